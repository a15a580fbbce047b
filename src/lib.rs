//! Passflow: passwordless authentication flows
//!
//! Drives multi-step sign-up, confirmation, sign-out and token refresh
//! against a remote identity provider. Every flow reports progress through a
//! busy/idle [`status::Status`] callback, returns a cancellable
//! [`handle::OperationHandle`], and concurrent sign-up or confirmation calls
//! share a single in-flight request.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use passflow::prelude::*;
//!
//! # async fn example(links: Arc<dyn SignInLinkRequester>) -> passflow::error::Result<()> {
//! let config = FlowConfig::from_env();
//! let gateway = Arc::new(CognitoGateway::new(&config)?);
//! let storage = Arc::new(FileStorage::new_default());
//! let flows = FlowOrchestrator::new(config, gateway, storage, links)?;
//!
//! let flow = flows.complete_sign_up_flow(
//!     SignUpRequest::builder()
//!         .username("alice")
//!         .email("alice@example.com")
//!         .status_cb(Arc::new(|status| println!("{status}")))
//!         .build(),
//! )?;
//! flow.completed().await?;
//! let confirmed = flow
//!     .confirm_sign_up(Confirmation::builder().confirmation_code("123456").build())?
//!     .completed()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flight;
pub mod flow;
pub mod gateway;
pub mod handle;
pub mod prelude;
pub mod refresh;
pub mod status;
pub mod storage;
pub mod token;
