// Descriptor scanning: scheduled method declarations of component types

use crate::container::{Instance, ParamType};
use crate::descriptor::ScheduleDescriptor;
use crate::errors::InvocationError;
use crate::invoker::{Arguments, Invocable};
use futures::future::{BoxFuture, FutureExt};
use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// A component type owning scheduled methods
///
/// ```ignore
/// impl Scheduled for Reports {
///     fn scheduled_methods() -> Vec<ScheduledMethod<Self>> {
///         vec![ScheduledMethod::new("nightly", ScheduleDescriptor::cron("schedule.nightly"))
///             .invoke0(|this: Arc<Self>| async move { this.nightly().await })]
///     }
/// }
/// ```
pub trait Scheduled: Send + Sync + Sized + 'static {
    fn scheduled_methods() -> Vec<ScheduledMethod<Self>>;
}

type BoundFn<T> =
    dyn Fn(Arc<T>, Arguments) -> BoxFuture<'static, Result<(), InvocationError>> + Send + Sync;

/// One scheduled method of `T`: name, descriptor and typed call
pub struct ScheduledMethod<T> {
    name: String,
    descriptor: ScheduleDescriptor,
    params: Vec<ParamType>,
    call: Arc<BoundFn<T>>,
}

/// A method whose call shape has not been given yet
pub struct MethodDeclaration<T> {
    name: String,
    descriptor: ScheduleDescriptor,
    _target: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ScheduledMethod<T> {
    pub fn new(name: impl Into<String>, descriptor: ScheduleDescriptor) -> MethodDeclaration<T> {
        MethodDeclaration {
            name: name.into(),
            descriptor,
            _target: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ScheduleDescriptor {
        &self.descriptor
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Bind to `target` without keeping it alive
    pub fn bind(&self, target: &Arc<T>) -> Invocable {
        let weak: Weak<T> = Arc::downgrade(target);
        let call = Arc::clone(&self.call);
        let label = format!("{}.{}", type_name::<T>(), self.name);

        Invocable::new(
            type_name::<T>(),
            self.name.clone(),
            self.params.clone(),
            Arc::new(move |args: Arguments| match weak.upgrade() {
                Some(target) => call(target, args),
                None => futures::future::ready(Err(InvocationError::Access(label.clone()))).boxed(),
            }),
        )
    }
}

fn target_result(result: anyhow::Result<()>) -> Result<(), InvocationError> {
    result.map_err(InvocationError::Target)
}

/// Take the argument at `position` as an `A`
fn take<A: Any + Send + Sync>(
    slot: Option<Instance>,
    method: &str,
    position: usize,
) -> Result<Option<Arc<A>>, InvocationError> {
    match slot {
        None => Ok(None),
        Some(instance) => instance
            .downcast::<A>()
            .map(Some)
            .map_err(|_| InvocationError::IllegalArgument {
                method: method.to_string(),
                position,
                expected: type_name::<A>(),
            }),
    }
}

impl<T: Send + Sync + 'static> MethodDeclaration<T> {
    fn finish(self, params: Vec<ParamType>, call: Arc<BoundFn<T>>) -> ScheduledMethod<T> {
        ScheduledMethod {
            name: self.name,
            descriptor: self.descriptor,
            params,
            call,
        }
    }

    fn label(&self) -> String {
        format!("{}.{}", type_name::<T>(), self.name)
    }

    pub fn invoke0<F, Fut>(self, f: F) -> ScheduledMethod<T>
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.finish(
            vec![],
            Arc::new(move |target: Arc<T>, _args: Arguments| f(target).map(target_result).boxed()),
        )
    }

    pub fn invoke1<A, F, Fut>(self, f: F) -> ScheduledMethod<T>
    where
        A: Any + Send + Sync,
        F: Fn(Arc<T>, Option<Arc<A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = self.label();
        self.finish(
            vec![ParamType::of::<A>()],
            Arc::new(move |target: Arc<T>, args: Arguments| {
                let mut args = args.into_iter();
                match take::<A>(args.next().flatten(), &label, 0) {
                    Ok(a) => f(target, a).map(target_result).boxed(),
                    Err(e) => futures::future::ready(Err(e)).boxed(),
                }
            }),
        )
    }

    pub fn invoke2<A, B, F, Fut>(self, f: F) -> ScheduledMethod<T>
    where
        A: Any + Send + Sync,
        B: Any + Send + Sync,
        F: Fn(Arc<T>, Option<Arc<A>>, Option<Arc<B>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = self.label();
        self.finish(
            vec![ParamType::of::<A>(), ParamType::of::<B>()],
            Arc::new(move |target: Arc<T>, args: Arguments| {
                let mut args = args.into_iter();
                let bound = take::<A>(args.next().flatten(), &label, 0)
                    .and_then(|a| Ok((a, take::<B>(args.next().flatten(), &label, 1)?)));
                match bound {
                    Ok((a, b)) => f(target, a, b).map(target_result).boxed(),
                    Err(e) => futures::future::ready(Err(e)).boxed(),
                }
            }),
        )
    }

    pub fn invoke3<A, B, C, F, Fut>(self, f: F) -> ScheduledMethod<T>
    where
        A: Any + Send + Sync,
        B: Any + Send + Sync,
        C: Any + Send + Sync,
        F: Fn(Arc<T>, Option<Arc<A>>, Option<Arc<B>>, Option<Arc<C>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = self.label();
        self.finish(
            vec![ParamType::of::<A>(), ParamType::of::<B>(), ParamType::of::<C>()],
            Arc::new(move |target: Arc<T>, args: Arguments| {
                let mut args = args.into_iter();
                let bound = (|| {
                    Ok::<_, InvocationError>((
                        take::<A>(args.next().flatten(), &label, 0)?,
                        take::<B>(args.next().flatten(), &label, 1)?,
                        take::<C>(args.next().flatten(), &label, 2)?,
                    ))
                })();
                match bound {
                    Ok((a, b, c)) => f(target, a, b, c).map(target_result).boxed(),
                    Err(e) => futures::future::ready(Err(e)).boxed(),
                }
            }),
        )
    }
}

/// Registration request for one scheduled method of one instance
#[derive(Debug, Clone)]
pub struct Registration {
    pub declaring_type: &'static str,
    pub method: String,
    pub descriptor: ScheduleDescriptor,
    pub invocable: Invocable,
}

impl Registration {
    /// `declaring_type.method`
    pub fn task_name(&self) -> String {
        self.invocable.name()
    }
}

/// One registration request per scheduled method of `target`
///
/// Registrations hold `target` weakly; the caller keeps the `Arc` alive or
/// every later invocation fails with `InvocationError::Access`.
pub fn scan<T: Scheduled>(target: &Arc<T>) -> Vec<Registration> {
    T::scheduled_methods()
        .into_iter()
        .map(|method| Registration {
            declaring_type: type_name::<T>(),
            method: method.name.clone(),
            invocable: method.bind(target),
            descriptor: method.descriptor,
        })
        .collect()
}
