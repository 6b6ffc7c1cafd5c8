//! Stock middlewares shared by every transport.

use std::time::Instant;

use crate::{BoxError, Endpoint, Middleware};

#[derive(Debug, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;

/// Logs each call with its transport, outcome and duration.
pub fn logging<Req, Resp>(name: &'static str) -> Middleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    Middleware::new(move |next: Endpoint<Req, Resp>| {
        Endpoint::new(move |ctx, req| {
            let next = next.clone();
            async move {
                let started = Instant::now();
                let transport = ctx.transport();
                let session = ctx.session_id().map(str::to_owned);
                let out = next.call(ctx, req).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &out {
                    Ok(_) => tracing::debug!(
                        target: "kit::endpoint",
                        endpoint = name,
                        %transport,
                        session = session.as_deref().unwrap_or("-"),
                        elapsed_ms,
                        "endpoint ok"
                    ),
                    Err(err) => tracing::warn!(
                        target: "kit::endpoint",
                        endpoint = name,
                        %transport,
                        session = session.as_deref().unwrap_or("-"),
                        elapsed_ms,
                        error = %err,
                        "endpoint failed"
                    ),
                }
                out
            }
        })
    })
}

/// Fails fast once the request context is cancelled, and abandons the inner
/// call if cancellation arrives while it runs.
pub fn cancellable<Req, Resp>() -> Middleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    Middleware::new(|next: Endpoint<Req, Resp>| {
        Endpoint::new(move |ctx, req| {
            let next = next.clone();
            async move {
                let token = ctx.cancellation().clone();
                if token.is_cancelled() {
                    return Err(Box::new(Cancelled) as BoxError);
                }
                tokio::select! {
                    out = next.call(ctx, req) => out,
                    _ = token.cancelled() => Err(Box::new(Cancelled) as BoxError),
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain, RequestContext};
    use std::time::Duration;

    fn echo() -> Endpoint<u32, u32> {
        Endpoint::new(|_ctx, n: u32| async move { Ok::<_, BoxError>(n) })
    }

    #[tokio::test]
    async fn logging_passes_result_through() {
        let ep = logging("echo").wrap(echo());
        assert_eq!(ep.call(RequestContext::new(), 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cancellable_rejects_cancelled_context() {
        let ctx = RequestContext::new();
        ctx.cancellation().cancel();
        let ep = cancellable().wrap(echo());
        let err = ep.call(ctx, 1).await.unwrap_err();
        assert!(err.is::<Cancelled>());
    }

    #[tokio::test]
    async fn cancellable_aborts_slow_endpoint() {
        let slow: Endpoint<(), ()> = Endpoint::new(|_ctx, _req| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, BoxError>(())
        });
        let ep = chain(logging("slow"), [cancellable()]).wrap(slow);

        let ctx = RequestContext::new();
        let token = ctx.cancellation().clone();
        let call = tokio::spawn(async move { ep.call(ctx, ()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "request cancelled");
    }
}
