//! Container image reference parsing
//!
//! Grammar: `[registry/]repository[:tag|@digest]`. The first path segment
//! is a registry only when it looks like a host (contains `.` or `:`, or is
//! `localhost`).

use std::fmt;

use crate::crd::{ImageComponent, OverriderOperator};

use super::OverrideError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    tag: Option<TagOrDigest>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TagOrDigest {
    Tag(String),
    Digest(String),
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, OverrideError> {
        let image = image.trim();
        if image.is_empty() {
            return Err(OverrideError::InvalidImage(image.to_string()));
        }

        let (name, tag) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(TagOrDigest::Digest(digest.to_string()))),
            None => {
                let last_segment = image.rfind('/').map(|i| i + 1).unwrap_or(0);
                match image[last_segment..].rfind(':') {
                    Some(i) => {
                        let split = last_segment + i;
                        (
                            &image[..split],
                            Some(TagOrDigest::Tag(image[split + 1..].to_string())),
                        )
                    }
                    None => (image, None),
                }
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (host.to_string(), rest.to_string()),
            _ => (String::new(), name.to_string()),
        };

        if repository.is_empty() {
            return Err(OverrideError::InvalidImage(image.to_string()));
        }

        Ok(Self {
            registry,
            repository,
            tag,
        })
    }

    /// Tag or digest without its delimiter
    pub fn tag(&self) -> Option<&str> {
        match &self.tag {
            Some(TagOrDigest::Tag(t)) | Some(TagOrDigest::Digest(t)) => Some(t),
            None => None,
        }
    }

    fn set_tag_or_digest(&mut self, value: &str) {
        self.tag = if value.is_empty() {
            None
        } else if looks_like_digest(value) {
            Some(TagOrDigest::Digest(value.to_string()))
        } else {
            Some(TagOrDigest::Tag(value.to_string()))
        };
    }

    /// Rewrite one component in place
    pub fn apply(&mut self, component: ImageComponent, operator: OverriderOperator, value: &str) {
        match component {
            ImageComponent::Registry => {
                self.registry = apply_operator(&self.registry, operator, value);
            }
            ImageComponent::Repository => {
                self.repository = apply_operator(&self.repository, operator, value);
            }
            ImageComponent::Tag => {
                let current = self.tag().unwrap_or_default().to_string();
                let updated = apply_operator(&current, operator, value);
                self.set_tag_or_digest(&updated);
            }
        }
    }
}

fn apply_operator(current: &str, operator: OverriderOperator, value: &str) -> String {
    match operator {
        OverriderOperator::Add => format!("{current}{value}"),
        OverriderOperator::Replace => value.to_string(),
        OverriderOperator::Remove => String::new(),
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn looks_like_digest(value: &str) -> bool {
    matches!(value.split_once(':'), Some((algo, hex)) if !algo.is_empty()
        && algo.chars().all(|c| c.is_ascii_alphanumeric())
        && hex.len() >= 32
        && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        write!(f, "{}", self.repository)?;
        match &self.tag {
            Some(TagOrDigest::Tag(t)) => write!(f, ":{t}"),
            Some(TagOrDigest::Digest(d)) => write!(f, "@{d}"),
            None => Ok(()),
        }
    }
}
