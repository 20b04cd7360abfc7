//! Method registry.
//!
//! Maps method names to handler records. Each record decodes the request
//! payload, runs the handler, and encodes its result. Payload values live
//! only for the duration of one `dispatch` call, so the registry can be
//! shared across connections without synchronization.

use crate::envelope::FailureKind;
use crate::methods;
use bytes::Bytes;
use prost::{DecodeError, Message};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// Domain failure raised by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
}

/// Failure to route or run a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{0}: not supported")]
    NotSupported(String),
    #[error("{method}: malformed payload: {source}")]
    Decode {
        method: String,
        #[source]
        source: DecodeError,
    },
    #[error("{method}: {source}")]
    Execution {
        method: String,
        #[source]
        source: ExecutionError,
    },
}

impl DispatchError {
    /// Failure class reported to the caller.
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::NotSupported(_) => FailureKind::Route,
            DispatchError::Decode { .. } => FailureKind::Decode,
            DispatchError::Execution { .. } => FailureKind::Execution,
        }
    }
}

enum HandlerError {
    Decode(DecodeError),
    Execution(ExecutionError),
}

type Handler = dyn Fn(&[u8]) -> Result<Bytes, HandlerError> + Send + Sync;

/// Table of callable methods.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Box<Handler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in `Reflector` and `Calculator` services.
    pub fn with_default_methods() -> Self {
        let mut registry = Self::new();
        methods::register_all(&mut registry);
        registry
    }

    /// Register `execute` under `name`.
    ///
    /// The payload codec comes from the prost `Message` impls of `Req` and `Res`.
    /// Registering an existing name replaces the previous handler.
    pub fn register<Req, Res, F>(&mut self, name: &str, execute: F)
    where
        Req: Message + Default,
        Res: Message,
        F: Fn(Req) -> Result<Res, ExecutionError> + Send + Sync + 'static,
    {
        let handler = move |payload: &[u8]| -> Result<Bytes, HandlerError> {
            let request = Req::decode(payload).map_err(HandlerError::Decode)?;
            let result = execute(request).map_err(HandlerError::Execution)?;
            Ok(Bytes::from(result.encode_to_vec()))
        };

        let key = method_key(name).to_string();
        if self.methods.insert(key, Box::new(handler)).is_some() {
            warn!(method = name, "Replaced existing method handler");
        }
    }

    /// Route `payload` to the handler registered under `name`.
    pub fn dispatch(&self, name: &str, payload: &[u8]) -> Result<Bytes, DispatchError> {
        let handler = self
            .methods
            .get(method_key(name))
            .ok_or_else(|| DispatchError::NotSupported(name.to_string()))?;

        handler(payload).map_err(|e| match e {
            HandlerError::Decode(source) => DispatchError::Decode {
                method: name.to_string(),
                source,
            },
            HandlerError::Execution(source) => DispatchError::Execution {
                method: name.to_string(),
                source,
            },
        })
    }

    /// Check whether a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(method_key(name))
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Protobuf reflection clients send fully-qualified names with a leading dot.
fn method_key(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}
