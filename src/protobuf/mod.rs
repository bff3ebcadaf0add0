//! Generated protobuf modules
//!
//! Code generated by build.rs from the `.proto` files under `protos/` when the
//! `meshtastic-proto` feature is enabled.

#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic_generated {
    //! Generated Meshtastic device API types (package `meshtastic`).
    #[allow(dead_code, clippy::all)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
