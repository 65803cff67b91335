//! Client facade and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ServiceClientBuilder`] with validation |
//! | `core` | [`ServiceClient`] facade and session restore |
//! | `options` | [`ClientOptions`] |

// ============================================================================
// Submodules
// ============================================================================

/// Client builder.
pub mod builder;

/// Client facade.
pub mod core;

/// Connection options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServiceClientBuilder;
pub use self::core::ServiceClient;
pub use options::ClientOptions;
