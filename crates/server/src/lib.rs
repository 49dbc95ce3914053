//! Server half of Switchyard: procedures, routing, and the two
//! transports that invoke them.
//!
//! ```rust,no_run
//! use sy_domain::{Kind, ObjectSchema};
//! use sy_server::{Context, Procedure, ProcedureError, Router, RpcServer};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let hello = Procedure::new()
//!     .input(ObjectSchema::new().required("name", Kind::String))
//!     .query(|ctx: Context| async move {
//!         #[derive(serde::Deserialize)]
//!         struct Args { name: String }
//!         let args: Args = ctx.input_as()?;
//!         Ok::<_, ProcedureError>(serde_json::json!({ "message": format!("Hello, {}!", args.name) }))
//!     });
//!
//! let app = RpcServer::builder(Router::new().route("helloWorld", hello))
//!     .build()
//!     .into_router();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:4710").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod cookies;
pub mod duplex;
pub mod error;
pub mod http;
pub mod procedure;
pub mod router;
pub mod server;

pub use context::{Context, Middleware};
pub use cookies::{CookieJar, CookieOptions, RequestCookies, SameSite};
pub use error::ProcedureError;
pub use procedure::{
    Emitter, Procedure, ProcedureResponse, SubscriptionHandler, Teardown, UnaryHandler,
};
pub use router::{Handler, Route, RouteMatch, RouteTable, Router, Segment};
pub use server::{RpcServer, RpcServerBuilder};
