use crate::message::Message;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Marker trait for service handler errors
pub trait ServiceHandlerError: Error + Send + Sync + 'static {}

/// A trait representing a responder to requests on a subject.
#[async_trait]
pub trait ServiceHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for the handler.
    type Error: ServiceHandlerError;

    /// The decoded request type.
    type Request: Debug + DeserializeOwned + Send + 'static;

    /// The response type sent back to the requester.
    type Response: Debug + Serialize + Send + Sync + 'static;

    /// Handles a request and produces the reply.
    async fn handle(
        &self,
        request: Self::Request,
        message: &Message,
    ) -> Result<Self::Response, Self::Error>;
}
