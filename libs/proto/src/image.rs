//! Image views reported by nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Value reported for images that are known only to a registry.
pub const REMOTE_SENTINEL: &str = "Remote";

/// Where an image is available.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageLocation {
    /// Present on the node; carries the content digest.
    Local(String),
    /// Known only to the registry.
    Remote,
}

impl ImageLocation {
    pub fn local(digest: impl Into<String>) -> Self {
        Self::Local(digest.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ImageLocation::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageLocation::Remote)
    }

    pub fn digest(&self) -> Option<&str> {
        match self {
            ImageLocation::Local(digest) => Some(digest),
            ImageLocation::Remote => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageLocation::Local(digest) => digest,
            ImageLocation::Remote => REMOTE_SENTINEL,
        }
    }
}

impl Serialize for ImageLocation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImageLocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw == REMOTE_SENTINEL {
            Ok(ImageLocation::Remote)
        } else {
            Ok(ImageLocation::Local(raw))
        }
    }
}

/// Image name to location, as reported by one node or merged for a pool.
pub type ImageMap = BTreeMap<String, ImageLocation>;

/// Names of the locally present images in a view.
pub fn local_image_names(images: &ImageMap) -> impl Iterator<Item = &str> {
    images
        .iter()
        .filter(|(_, location)| location.is_local())
        .map(|(name, _)| name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_sentinel_json() {
        let mut images = ImageMap::new();
        images.insert("cloud_android_12_rel".to_string(), ImageLocation::local("abc123"));
        images.insert("cloud_android_13_db".to_string(), ImageLocation::Remote);

        let json = serde_json::to_string(&images).unwrap();
        assert_eq!(
            json,
            r#"{"cloud_android_12_rel":"abc123","cloud_android_13_db":"Remote"}"#
        );

        let parsed: ImageMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, images);
        assert_eq!(
            local_image_names(&parsed).collect::<Vec<_>>(),
            vec!["cloud_android_12_rel"]
        );
    }
}
