//! Random identifiers for data objects, uploads, versions and temp files.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const ID_BYTE_LENGTH: usize = 128;

/// Returns `length` random bytes encoded as RawURL base64 (no padding).
/// Aborts the process if the OS entropy source fails.
pub fn new_id(length: usize) -> String {
    let mut buf = vec![0u8; length];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Returns a new random temporary filename.
pub fn new_temp_filename() -> String {
    new_id(ID_BYTE_LENGTH)
}

macro_rules! random_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> $name {
                $name(new_id(ID_BYTE_LENGTH))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> $name {
                $name(value)
            }
        }
    };
}

random_id!(
    /// Identity of a published data object.
    DataId
);
random_id!(
    /// Identity of an in-flight multipart upload.
    UploadId
);
random_id!(
    /// Identity of an object version.
    VersionId
);
