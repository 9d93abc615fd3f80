//! CLI command implementations.
//!
//! | Module   | Commands handled       |
//! |----------|------------------------|
//! | `serve`  | `Serve`                |
//! | `render` | `Defaults`, `Render`   |

pub mod render;
pub mod serve;

pub use render::{cmd_defaults, cmd_render};
pub use serve::cmd_serve;
