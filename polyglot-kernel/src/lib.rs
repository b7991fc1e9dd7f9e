#![deny(missing_docs)]
//! Kernels for polyglot hosts.
//!
//! A kernel receives commands and raises events. Kernels are arranged in
//! a tree: a [`CompositeKernel`] at the root routes each command to one
//! child, and every kernel in the tree shares one scheduler, so commands
//! run one at a time in submission order.
//!
//! | Type | Role |
//! |------|------|
//! | [`Kernel`] | The trait every kernel implements |
//! | [`KernelCore`] | Handlers, descriptor, event subject and parent link |
//! | [`LocalKernel`] | A kernel made only of registered handlers |
//! | [`CompositeKernel`] | Routes to children by URI, name, alias or default |
//! | [`InvocationContext`] | Live state of one root command |
//! | [`CommandHandler`] | Handles one command type |
//!
//! ```no_run
//! use polyglot_kernel::{CompositeKernel, Kernel, LocalKernel, handler_fn};
//! use polyglot_protocol::command::SubmitCode;
//! use polyglot_protocol::event::ReturnValueProduced;
//! use polyglot_protocol::{FormattedValue, KernelCommandEnvelope};
//!
//! # async fn run() -> Result<(), polyglot_kernel::KernelError> {
//! let root = CompositeKernel::new("root");
//! let csharp = LocalKernel::new("csharp");
//! csharp.register_command_handler(
//!     "SubmitCode",
//!     handler_fn(|inv| async move {
//!         inv.publish(ReturnValueProduced {
//!             formatted_values: vec![FormattedValue::plain_text("2")],
//!             value_id: None,
//!         });
//!         Ok(())
//!     }),
//! );
//! root.add(csharp, &["c#"])?;
//!
//! let result = root.send(KernelCommandEnvelope::new(SubmitCode::new("1 + 1"))).await?;
//! assert!(result.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod context;
pub mod error;
pub mod handler;
pub mod kernel;
pub mod result;
pub mod runtime;

pub use composite::CompositeKernel;
pub use context::{HandlingKernel, InvocationContext};
pub use error::KernelError;
pub use handler::{CommandHandler, KernelInvocation, handler_fn};
pub use kernel::{Kernel, KernelCore, LocalKernel, handle_command_base, root_kernel};
pub use result::{KernelCommandResult, submit_command_and_get_result};
pub use runtime::{DEFAULT_NOOP_COMMAND_TYPES, KernelRuntime};
