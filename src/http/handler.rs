//! Application entry point.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::context::HttpContext;
use crate::http::error::AppError;

/// Application code invoked once per request.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>>;
}

/// Adapter turning a closure into a [`Handler`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F>(F);

/// Build a handler from a closure returning a boxed future.
///
/// ```ignore
/// let handler = handler_fn(|ctx| Box::pin(async move {
///     ctx.response_mut().write("hi").await?;
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> + Send + Sync + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        (self.0)(ctx)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        (**self).call(ctx)
    }
}
