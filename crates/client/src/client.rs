//! Typed call builder over a [`LinkChain`].
//!
//! Path segments accumulate into an explicit descriptor before dispatch:
//!
//! ```rust,no_run
//! # use sy_client::{Client, LinkChain};
//! # async fn demo(chain: LinkChain) -> Result<(), sy_client::CallError> {
//! let client = Client::new(chain);
//! let user: serde_json::Value = client.at("users").at("id:7").query(&()).await?;
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::duplex::Unsubscribe;
use crate::error::CallError;
use crate::links::{LinkChain, Operation, Outcome};

#[derive(Clone)]
pub struct Client {
    chain: LinkChain,
}

impl Client {
    pub fn new(chain: LinkChain) -> Self {
        Self { chain }
    }

    /// Start a call descriptor at `segment`.  Segments may contain `/`.
    pub fn at(&self, segment: impl AsRef<str>) -> CallBuilder {
        CallBuilder {
            chain: self.chain.clone(),
            segments: Vec::new(),
        }
        .at(segment)
    }
}

#[derive(Clone)]
pub struct CallBuilder {
    chain: LinkChain,
    segments: Vec<String>,
}

impl CallBuilder {
    pub fn at(mut self, segment: impl AsRef<str>) -> Self {
        self.segments.extend(
            segment
                .as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    /// Wire path, e.g. `/users/id:7`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub async fn query_raw(&self, input: Option<Value>) -> Result<Value, CallError> {
        let op = Operation::Query {
            path: self.path(),
            input,
        };
        match self.chain.execute(op).await? {
            Outcome::Value(v) => Ok(v),
            Outcome::Subscribed(unsubscribe) => {
                unsubscribe();
                Err(CallError::Decode(format!(
                    "{}: query answered with a subscription",
                    self.path()
                )))
            }
        }
    }

    /// Run a query.  An input serialising to `null` (e.g. `&()`) is sent
    /// as absent.
    pub async fn query<I, O>(&self, input: &I) -> Result<O, CallError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let value = self.query_raw(to_input(input)?).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Subscribe.  Messages that do not deserialise into `O` reach
    /// `on_message` as [`CallError::Decode`].
    pub async fn subscribe<I, O, F>(&self, input: &I, on_message: F) -> Result<Unsubscribe, CallError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
        F: Fn(Result<O, CallError>) + Send + Sync + 'static,
    {
        let op = Operation::Subscribe {
            path: self.path(),
            input: to_input(input)?,
            callback: std::sync::Arc::new(move |msg: Result<Value, CallError>| {
                on_message(msg.and_then(|v| serde_json::from_value(v).map_err(CallError::from)))
            }),
        };
        match self.chain.execute(op).await? {
            Outcome::Subscribed(unsubscribe) => Ok(unsubscribe),
            Outcome::Value(_) => Err(CallError::Decode(format!(
                "{}: subscription answered with a value",
                self.path()
            ))),
        }
    }
}

fn to_input<I: Serialize + ?Sized>(input: &I) -> Result<Option<Value>, CallError> {
    match serde_json::to_value(input)? {
        Value::Null => Ok(None),
        v => Ok(Some(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::links::{Link, Next};

    struct Echo;

    #[async_trait]
    impl Link for Echo {
        async fn handle(&self, op: Operation, _next: Next<'_>) -> Result<Outcome, CallError> {
            Ok(Outcome::Value(json!({ "path": op.path(), "input": op.input() })))
        }
    }

    fn client() -> Client {
        Client::new(LinkChain::new(vec![Arc::new(Echo)]))
    }

    #[test]
    fn segments_accumulate_into_a_path() {
        let c = client();
        assert_eq!(c.at("users").at("id:7").path(), "/users/id:7");
        assert_eq!(c.at("/users/").at("/id:7").path(), "/users/id:7");
        assert_eq!(c.at("a/b").path(), "/a/b");
    }

    #[tokio::test]
    async fn unit_input_is_sent_as_absent() {
        let out: Value = client().at("helloWorld").query(&()).await.unwrap();
        assert_eq!(out, json!({"path": "/helloWorld", "input": null}));

        let out: Value = client().at("helloWorld").query(&json!({"name": "Ada"})).await.unwrap();
        assert_eq!(out["input"]["name"], "Ada");
    }

    #[tokio::test]
    async fn output_shape_mismatch_is_a_decode_error() {
        let err = client().at("x").query::<_, u32>(&()).await.unwrap_err();
        assert!(matches!(err, CallError::Decode(_)));
    }
}
