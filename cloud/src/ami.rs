//! Choosing the image an instance boots from.

use crate::ec2::{Ec2Api, ImageInfo};
use crate::error::{self, Result};
use crate::filter::{self, Filter};
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;

/// The account that publishes the cluster machine images.
pub const DEFAULT_MACHINE_AMI_OWNER_ID: &str = "258751437250";
pub const DEFAULT_MACHINE_AMI_NAME: &str = "capa-ami-ubuntu-18.04-*";

/// Canonical, for the Ubuntu images used by the bastion host.
pub const UBUNTU_OWNER_ID: &str = "099720109477";
pub const DEFAULT_BASTION_AMI_NAME: &str =
    "ubuntu/images/hvm-ssd/ubuntu-bionic-18.04-amd64-server-*";

/// Where to find an image when none was given explicitly: first a fixed image per region, then
/// the newest available image of `owner_id` whose name matches `name_pattern`.
///
/// The defaults ship no fixed images; `region_images` is only filled from configuration, so an
/// unconfigured lookup always discovers the image with `DescribeImages`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLookup {
    #[serde(default)]
    pub region_images: BTreeMap<String, String>,
    pub owner_id: String,
    pub name_pattern: String,
}

impl ImageLookup {
    pub fn machine_default() -> Self {
        Self {
            region_images: BTreeMap::new(),
            owner_id: DEFAULT_MACHINE_AMI_OWNER_ID.to_string(),
            name_pattern: DEFAULT_MACHINE_AMI_NAME.to_string(),
        }
    }

    pub fn bastion_default() -> Self {
        Self {
            region_images: BTreeMap::new(),
            owner_id: UBUNTU_OWNER_ID.to_string(),
            name_pattern: DEFAULT_BASTION_AMI_NAME.to_string(),
        }
    }

    fn filters(&self) -> Vec<Filter> {
        vec![
            filter::image_name(&self.name_pattern),
            Filter::new("architecture", ["x86_64"]),
            Filter::new("state", ["available"]),
            Filter::new("virtualization-type", ["hvm"]),
        ]
    }

    /// Resolves the image ID to use in `region`.
    pub async fn resolve<C>(&self, ec2: &C, explicit: Option<&str>, region: &str) -> Result<String>
    where
        C: Ec2Api + ?Sized,
    {
        if let Some(id) = explicit.filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        if let Some(id) = self.region_images.get(region) {
            debug!("Using image '{}' for region '{}'", id, region);
            return Ok(id.clone());
        }

        let images = ec2
            .describe_images(&[self.owner_id.clone()], &self.filters())
            .await
            .context(error::AwsSnafu {
                operation: format!("find image matching '{}'", self.name_pattern),
            })?;
        let image = latest_image(images).context(error::NotFoundSnafu {
            what: format!(
                "image of owner '{}' matching '{}'",
                self.owner_id, self.name_pattern
            ),
        })?;
        debug!("Found image '{}' ({})", image.id, image.name);
        Ok(image.id)
    }
}

/// The image lookups of the machines and of the bastion host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLookups {
    pub machine: ImageLookup,
    pub bastion: ImageLookup,
}

impl Default for ImageLookups {
    fn default() -> Self {
        Self {
            machine: ImageLookup::machine_default(),
            bastion: ImageLookup::bastion_default(),
        }
    }
}

/// AWS creation dates are ISO 8601 timestamps, so they sort as strings.
fn latest_image(images: Vec<ImageInfo>) -> Option<ImageInfo> {
    images
        .into_iter()
        .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
}
