// Invoker task: binds fire-time arguments and calls the scheduled method

use crate::container::{Instance, InstanceResolver, ParamType};
use crate::errors::InvocationError;
use crate::scheduler::JobExecutionContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Positional arguments of one call; `None` marks an unresolved slot
pub type Arguments = Vec<Option<Instance>>;

pub type CallFn =
    dyn Fn(Arguments) -> BoxFuture<'static, Result<(), InvocationError>> + Send + Sync;

/// A scheduled method bound to its target, captured once at registration
#[derive(Clone)]
pub struct Invocable {
    declaring_type: &'static str,
    method: String,
    params: Vec<ParamType>,
    call: Arc<CallFn>,
}

impl Invocable {
    pub fn new(
        declaring_type: &'static str,
        method: impl Into<String>,
        params: Vec<ParamType>,
        call: Arc<CallFn>,
    ) -> Self {
        Self {
            declaring_type,
            method: method.into(),
            params,
            call,
        }
    }

    pub fn declaring_type(&self) -> &'static str {
        self.declaring_type
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// `declaring_type.method`
    pub fn name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.method)
    }

    /// Call the method; `args` must line up with [`Invocable::params`]
    pub async fn invoke(&self, args: Arguments) -> Result<(), InvocationError> {
        if args.len() != self.params.len() {
            return Err(InvocationError::IllegalArgument {
                method: self.name(),
                position: args.len().min(self.params.len()),
                expected: self
                    .params
                    .get(args.len())
                    .map(ParamType::type_name)
                    .unwrap_or("no further argument"),
            });
        }
        (self.call)(args).await
    }
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocable")
            .field("declaring_type", &self.declaring_type)
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Unit of work executed by a guarded job on every fire
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, context: Arc<JobExecutionContext>) -> Result<(), InvocationError>;
}

pub struct InvokerTask {
    name: String,
    invocable: Invocable,
    resolver: Arc<dyn InstanceResolver>,
}

impl InvokerTask {
    pub fn new(invocable: Invocable, resolver: Arc<dyn InstanceResolver>) -> Self {
        Self {
            name: invocable.name(),
            invocable,
            resolver,
        }
    }

    /// Resolve every declared parameter left to right
    ///
    /// The execution context type is served from the current fire; everything
    /// else comes from the resolver. Unresolvable parameters stay empty.
    pub fn resolve_arguments(&self, context: &Arc<JobExecutionContext>) -> Arguments {
        let context_type = ParamType::of::<JobExecutionContext>();

        self.invocable
            .params()
            .iter()
            .enumerate()
            .map(|(position, param)| {
                if *param == context_type {
                    let instance: Instance = context.clone();
                    return Some(instance);
                }

                let resolved = self.resolver.resolve(param);
                if resolved.is_none() {
                    warn!(
                        task = %self.name,
                        position = position,
                        param = param.type_name(),
                        "No instance available for parameter, passing none"
                    );
                }
                resolved
            })
            .collect()
    }
}

#[async_trait]
impl Task for InvokerTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: Arc<JobExecutionContext>) -> Result<(), InvocationError> {
        let args = if self.invocable.params().is_empty() {
            Vec::new()
        } else {
            self.resolve_arguments(&context)
        };

        debug!(
            task = %self.name,
            fire_instance_id = %context.fire_instance_id(),
            "Invoking scheduled method"
        );
        self.invocable.invoke(args).await
    }
}
