//! Deterministic backend resource names for lock targets.
//!
//! Each segment is kept verbatim when it only uses `[A-Za-z0-9._-]` and is at
//! most [`MAX_VERBATIM_SEGMENT_LEN`] bytes long. Any other segment becomes `~`
//! followed by the SHA-256 hex digest of its bytes. `~` never appears in a
//! verbatim segment, so the two forms cannot collide and distinct
//! `(namespace, lock_id)` pairs always map to distinct names.

use sha2::{Digest, Sha256};

use crate::LockTarget;

const MAX_VERBATIM_SEGMENT_LEN: usize = 128;
const HASHED_SEGMENT_MARKER: char = '~';

/// Normalised `{namespace}/{lock_id}` resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockResourceName {
    namespace_segment: String,
    lock_segment: String,
}

impl LockResourceName {
    /// Derives the resource name for one lock target.
    #[must_use]
    pub fn new(target: &LockTarget) -> Self {
        Self {
            namespace_segment: normalize_segment(target.namespace()),
            lock_segment: normalize_segment(target.lock_id()),
        }
    }

    /// Returns the normalised namespace segment.
    #[must_use]
    pub fn namespace_segment(&self) -> &str {
        self.namespace_segment.as_str()
    }

    /// Returns the normalised lock segment.
    #[must_use]
    pub fn lock_segment(&self) -> &str {
        self.lock_segment.as_str()
    }

    /// Returns `{namespace}/{lock_id}`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace_segment, self.lock_segment)
    }
}

impl std::fmt::Display for LockResourceName {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}/{}",
            self.namespace_segment, self.lock_segment
        )
    }
}

fn normalize_segment(value: &str) -> String {
    if is_verbatim_segment(value) {
        return value.to_owned();
    }

    let digest = Sha256::digest(value.as_bytes());
    format!("{HASHED_SEGMENT_MARKER}{}", hex::encode(digest))
}

fn is_verbatim_segment(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_VERBATIM_SEGMENT_LEN
        && value != "."
        && value != ".."
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-'))
}

#[cfg(test)]
mod tests {
    use primacy_core::AppResult;
    use proptest::prelude::*;

    use super::LockResourceName;
    use crate::LockTarget;

    #[test]
    fn safe_segments_are_kept_verbatim() -> AppResult<()> {
        let name = LockResourceName::new(&LockTarget::new("host", "My-Host_01.primary")?);
        assert_eq!(name.path(), "host/My-Host_01.primary");
        Ok(())
    }

    #[test]
    fn unsafe_segments_are_hashed() -> AppResult<()> {
        let name = LockResourceName::new(&LockTarget::new("host", "func/timer host")?);
        assert!(name.lock_segment().starts_with('~'));
        assert_eq!(name.lock_segment().len(), 65);
        assert!(!name.lock_segment().contains('/'));
        Ok(())
    }

    #[test]
    fn slash_cannot_merge_namespace_and_lock_id() -> AppResult<()> {
        let left = LockResourceName::new(&LockTarget::new("a/b", "c")?);
        let right = LockResourceName::new(&LockTarget::new("a", "b/c")?);
        assert_ne!(left.path(), right.path());
        Ok(())
    }

    #[test]
    fn case_is_preserved() -> AppResult<()> {
        let upper = LockResourceName::new(&LockTarget::new("host", "H1")?);
        let lower = LockResourceName::new(&LockTarget::new("host", "h1")?);
        assert_ne!(upper, lower);
        Ok(())
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9~/. _-]{1,12}".prop_filter("non-blank", |value| !value.trim().is_empty())
    }

    proptest! {
        #[test]
        fn distinct_targets_never_share_a_resource_name(
            left_namespace in segment(),
            left_lock in segment(),
            right_namespace in segment(),
            right_lock in segment(),
        ) {
            prop_assume!((&left_namespace, &left_lock) != (&right_namespace, &right_lock));

            let left = LockTarget::new(left_namespace, left_lock);
            let right = LockTarget::new(right_namespace, right_lock);
            prop_assume!(left.is_ok() && right.is_ok());
            let left = left.unwrap_or_else(|_| unreachable!());
            let right = right.unwrap_or_else(|_| unreachable!());

            prop_assert_ne!(
                LockResourceName::new(&left).path(),
                LockResourceName::new(&right).path()
            );
        }
    }
}
