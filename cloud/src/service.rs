use crate::ami::ImageLookups;
use crate::ec2::Ec2Api;
use crate::scope::ClusterScope;
use crate::wait::WaitConfig;

/// The EC2 service of a cluster: the network reconcilers, the instance lifecycle manager and the
/// bastion host. It is built for a single reconcile pass over `scope`.
pub struct Service<'a, C: ?Sized> {
    pub(crate) scope: &'a mut ClusterScope,
    pub(crate) ec2: &'a C,
    pub(crate) wait: WaitConfig,
    pub(crate) images: ImageLookups,
}

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub fn new(scope: &'a mut ClusterScope, ec2: &'a C) -> Self {
        Self {
            scope,
            ec2,
            wait: WaitConfig::default(),
            images: ImageLookups::default(),
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_image_lookups(mut self, images: ImageLookups) -> Self {
        self.images = images;
        self
    }

    pub fn scope(&self) -> &ClusterScope {
        self.scope
    }
}
