use crate::constants::{
    cluster_tag_key, TAG_NAME, TAG_PROVIDER_MANAGED, TAG_PROVIDER_ROLE, TAG_VALUE_TRUE,
};
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::btree_map::{IntoIter, Iter};
use std::collections::BTreeMap;

/// The tags that are attached to an AWS resource. Ordered so that API calls built from them are
/// deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> Iter<'_, String, String> {
        self.0.iter()
    }

    /// Copies every entry of `other` into `self`, overwriting existing keys.
    pub fn merge(&mut self, other: &Tags) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Returns the entries of `self` that are missing from `other` or have a different value
    /// there.
    pub fn difference(&self, other: &Tags) -> Tags {
        self.iter()
            .filter(|(k, v)| other.get(k) != Some(v.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether the cluster ownership tag marks the resource as `owned` by `cluster_name`.
    pub fn has_owned(&self, cluster_name: &str) -> bool {
        self.get(&cluster_tag_key(cluster_name)) == Some(ResourceLifecycle::Owned.as_str())
    }

    /// Whether the resource carries the cluster ownership tag with any lifecycle.
    pub fn has_cluster(&self, cluster_name: &str) -> bool {
        self.contains_key(&cluster_tag_key(cluster_name))
    }

    /// The value of the provider role tag.
    pub fn role(&self) -> Option<&str> {
        self.get(TAG_PROVIDER_ROLE)
    }

    /// The value of the `Name` tag.
    pub fn name(&self) -> Option<&str> {
        self.get(TAG_NAME)
    }
}

impl FromIterator<(String, String)> for Tags {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl IntoIterator for Tags {
    type Item = (String, String);
    type IntoIter = IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = (&'a String, &'a String);
    type IntoIter = Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Whether a resource was created by the cluster (`owned`) or is only used by it (`shared`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLifecycle {
    Owned,
    Shared,
}

derive_display_from_serialize!(ResourceLifecycle);
derive_fromstr_from_deserialize!(ResourceLifecycle);

impl ResourceLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceLifecycle::Owned => "owned",
            ResourceLifecycle::Shared => "shared",
        }
    }
}

/// The inputs from which the canonical tag set of a resource is built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildParams {
    pub cluster_name: String,
    pub lifecycle: ResourceLifecycle,
    /// The AWS ID of the resource being tagged, when it exists already.
    pub resource_id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub additional: Tags,
}

impl BuildParams {
    /// Parameters for a resource owned by `cluster_name` with no name or role.
    pub fn owned<S: Into<String>>(cluster_name: S) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            lifecycle: ResourceLifecycle::Owned,
            resource_id: None,
            name: None,
            role: None,
            additional: Tags::default(),
        }
    }

    pub fn with_resource_id<S: Into<String>>(mut self, resource_id: S) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_additional(mut self, additional: Tags) -> Self {
        self.additional = additional;
        self
    }

    /// Builds the tag map. Additional tags are written first so that they can never override the
    /// ownership, role or name tags.
    pub fn build(&self) -> Tags {
        let mut tags = self.additional.clone();
        tags.insert(cluster_tag_key(&self.cluster_name), self.lifecycle.as_str());
        if self.lifecycle == ResourceLifecycle::Owned {
            tags.insert(TAG_PROVIDER_MANAGED, TAG_VALUE_TRUE);
        }
        if let Some(role) = &self.role {
            tags.insert(TAG_PROVIDER_ROLE, role.as_str());
        }
        if let Some(name) = &self.name {
            tags.insert(TAG_NAME, name.as_str());
        }
        tags
    }
}
