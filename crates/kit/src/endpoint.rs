use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::RequestContext;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type EndpointFn<Req, Resp> =
    dyn Fn(RequestContext, Req) -> BoxFuture<'static, Result<Resp, BoxError>> + Send + Sync;

/// A unit of business logic: context plus typed request in, typed response or error out.
///
/// Endpoints know nothing about the transport that invoked them.
pub struct Endpoint<Req, Resp> {
    f: Arc<EndpointFn<Req, Resp>>,
}

impl<Req, Resp> Clone for Endpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<Req, Resp> Endpoint<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, BoxError>> + Send + 'static,
    {
        Self {
            f: Arc::new(
                move |ctx: RequestContext, req: Req| -> BoxFuture<'static, Result<Resp, BoxError>> {
                    f(ctx, req).boxed()
                },
            ),
        }
    }

    pub fn call(&self, ctx: RequestContext, req: Req) -> BoxFuture<'static, Result<Resp, BoxError>> {
        (self.f)(ctx, req)
    }
}

type MiddlewareFn<Req, Resp> = dyn Fn(Endpoint<Req, Resp>) -> Endpoint<Req, Resp> + Send + Sync;

/// Wraps one endpoint into another.
pub struct Middleware<Req, Resp> {
    f: Arc<MiddlewareFn<Req, Resp>>,
}

impl<Req, Resp> Clone for Middleware<Req, Resp> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<Req, Resp> Middleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Endpoint<Req, Resp>) -> Endpoint<Req, Resp> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn wrap(&self, next: Endpoint<Req, Resp>) -> Endpoint<Req, Resp> {
        (self.f)(next)
    }
}

/// Composes middlewares so that `outer` is the outermost wrapper.
///
/// `chain(a, [b, c]).wrap(ep)` runs a, b, c pre-logic, then `ep`, then c, b, a post-logic.
pub fn chain<Req, Resp>(
    outer: Middleware<Req, Resp>,
    others: impl IntoIterator<Item = Middleware<Req, Resp>>,
) -> Middleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let others: Vec<_> = others.into_iter().collect();
    Middleware::new(move |next| {
        let inner = others.iter().rev().fold(next, |ep, m| m.wrap(ep));
        outer.wrap(inner)
    })
}
