//! Core value and key types shared by the engine and the tester.
//!
//! - `Value`: the scalar flowing through store, snapshots, and actions
//! - `Kleene`: three-valued truth for condition evaluation
//! - `SensorKey`: namespaced store keys with role-based write permissions
//! - `Sample`: one timestamped observation inside the window store

mod key;
mod sample;
mod value;

pub use key::{KeyError, Namespace, SensorKey};
pub use sample::Sample;
pub use value::{Kleene, Value};
