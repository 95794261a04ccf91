//! Test support for the radiosonde-ingest workspace.
//!
//! Synthetic FM-94 messages and FM-35 files in the JSON interchange form the
//! decoders read, gzip and zip wrappers for them, a small station registry,
//! and scratch directories with controllable modification times.
//!
//! ```ignore
//! use test_utils::{bufr_message_bytes, temp_test_dir, write_file, BufrSoundingSpec};
//!
//! let dir = temp_test_dir();
//! let path = write_file(dir.path(), "spool/a.bin", &bufr_message_bytes(&BufrSoundingSpec::default()));
//! ```

pub mod fixtures;
pub mod generators;
pub mod scratch;

pub use fixtures::*;
pub use generators::*;
pub use scratch::*;

/// Assert two numbers are within `epsilon` of each other.
///
/// ```ignore
/// assert_approx_eq!(kernel::round_to(1013.256, 1), 1013.3, 1e-9);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "values differ by more than {:?}: left {:?}, right {:?}, diff {:?}",
                epsilon, left, right, diff
            );
        }
    }};
}
