use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::{Request, Response};

use crate::body::{RequestBody, ResponseBody};
use crate::context::CallContext;
use crate::error::Error;
use crate::transport::default_executor;

pub type HttpRequest = Request<RequestBody>;
pub type HttpResponse = Response<ResponseBody>;
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send + 'a>>;

/// Performs one request against a transport.
///
/// A returned response owns its body; whoever receives it is responsible for
/// reading it to the end (or draining it) so the connection can be reused.
/// Implementations should stop waiting once `context` is done.
pub trait Executor: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest, context: &'a CallContext) -> ExecuteFuture<'a>;
}

impl<E> Executor for Arc<E>
where
    E: Executor + ?Sized,
{
    fn execute<'a>(&'a self, request: HttpRequest, context: &'a CallContext) -> ExecuteFuture<'a> {
        (**self).execute(request, context)
    }
}

/// Handle to the process-wide [`HyperExecutor`](crate::HyperExecutor),
/// built on first use.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExecutor;

impl Executor for DefaultExecutor {
    fn execute<'a>(&'a self, request: HttpRequest, context: &'a CallContext) -> ExecuteFuture<'a> {
        Box::pin(async move {
            let executor = default_executor()?;
            executor.execute(request, context).await
        })
    }
}
