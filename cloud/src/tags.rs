//! Applying the canonical tag set to EC2 resources.

use crate::ec2::Ec2Api;
use crate::error::{self, Result};
use capa_model::{BuildParams, Tags};
use log::debug;
use snafu::ResultExt;

/// Tags `resource_id` with the full tag set built from `params`.
pub async fn apply<C>(ec2: &C, resource_id: &str, params: &BuildParams) -> Result<Tags>
where
    C: Ec2Api + ?Sized,
{
    let tags = params.build();
    ec2.create_tags(&[resource_id.to_string()], &tags)
        .await
        .context(error::AwsSnafu {
            operation: format!("tag resource '{}'", resource_id),
        })?;
    Ok(tags)
}

/// Makes sure that `resource_id`, currently tagged with `current`, carries the tag set built from
/// `params`. Only the missing or differing entries are written, and nothing is written when the
/// resource is already up to date. Returns the resulting tags.
pub async fn ensure<C>(
    ec2: &C,
    resource_id: &str,
    current: &Tags,
    params: &BuildParams,
) -> Result<Tags>
where
    C: Ec2Api + ?Sized,
{
    let want = params.build();
    let diff = want.difference(current);
    let mut result = current.clone();
    if diff.is_empty() {
        return Ok(result);
    }
    debug!("Updating tags {:?} on '{}'", diff, resource_id);
    ec2.create_tags(&[resource_id.to_string()], &diff)
        .await
        .context(error::AwsSnafu {
            operation: format!("tag resource '{}'", resource_id),
        })?;
    result.merge(&diff);
    Ok(result)
}

/// Writes `create` and removes the keys of `remove`, issuing each call only when it has work.
pub async fn update<C>(ec2: &C, resource_id: &str, create: &Tags, remove: &Tags) -> Result<()>
where
    C: Ec2Api + ?Sized,
{
    if !create.is_empty() {
        ec2.create_tags(&[resource_id.to_string()], create)
            .await
            .context(error::AwsSnafu {
                operation: format!("tag resource '{}'", resource_id),
            })?;
    }
    if !remove.is_empty() {
        ec2.delete_tags(&[resource_id.to_string()], remove)
            .await
            .context(error::AwsSnafu {
                operation: format!("remove tags from resource '{}'", resource_id),
            })?;
    }
    Ok(())
}
