//! Static file handler used by the binary.
//!
//! Serves GET and HEAD for files under a root directory, honoring single
//! byte ranges and `If-Range`.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use http::Method;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use spindle::http::range::{content_range, evaluate_request, unsatisfied_content_range, RangeOutcome};
use spindle::http::{AppError, Handler, HttpContext};

const CHUNK: usize = 64 * 1024;

pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a request path onto the root, refusing anything that climbs out.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

async fn not_found(ctx: &mut HttpContext) -> Result<(), AppError> {
    let response = ctx.response_mut();
    response.set_status(404)?;
    response.headers_mut().insert("Content-Type", "text/plain; charset=utf-8")?;
    response.write("not found\n").await?;
    Ok(())
}

async fn serve(root: &StaticFiles, ctx: &mut HttpContext) -> Result<(), AppError> {
    let method = ctx.request().method.clone();
    if method != Method::GET && method != Method::HEAD {
        let response = ctx.response_mut();
        response.set_status(405)?;
        response.headers_mut().insert("Allow", "GET, HEAD")?;
        return Ok(());
    }

    let Some(mut path) = root.resolve(&ctx.request().path) else {
        return not_found(ctx).await;
    };
    let mut metadata = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(_) => return not_found(ctx).await,
    };
    if metadata.is_dir() {
        path.push("index.html");
        metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return not_found(ctx).await,
        };
    }

    let length = metadata.len();
    let modified = metadata.modified().ok();
    let last_modified = modified.map(http_date);
    let etag = modified.map(|time| {
        let secs = DateTime::<Utc>::from(time).timestamp();
        format!("\"{length:x}-{secs:x}\"")
    });

    let outcome = evaluate_request(&ctx.request().headers, length, etag.as_deref(), last_modified.as_deref());
    tracing::debug!(trace_id = %ctx.trace_identifier(), path = %path.display(), ?outcome, "Serving file");

    let response = ctx.response_mut();
    response.headers_mut().insert("Accept-Ranges", "bytes")?;
    response.headers_mut().insert("Content-Type", content_type(&path))?;
    if let Some(etag) = &etag {
        response.headers_mut().insert("ETag", etag.as_str())?;
    }
    if let Some(last_modified) = &last_modified {
        response.headers_mut().insert("Last-Modified", last_modified.as_str())?;
    }

    let (start, count) = match outcome {
        RangeOutcome::Full => (0, length),
        RangeOutcome::Partial(range) => {
            response.set_status(206)?;
            response.headers_mut().insert("Content-Range", content_range(&range, length))?;
            (range.start, range.len())
        }
        RangeOutcome::NotSatisfiable => {
            response.set_status(416)?;
            response.headers_mut().insert("Content-Range", unsatisfied_content_range(length))?;
            response.headers_mut().insert("Content-Length", "0")?;
            return Ok(());
        }
    };
    response.headers_mut().insert("Content-Length", count.to_string())?;

    if method == Method::HEAD || count == 0 {
        return Ok(());
    }

    let mut file = tokio::fs::File::open(&path).await?;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let mut remaining = count;
    let mut buf = vec![0u8; CHUNK];
    while remaining > 0 {
        let want = remaining.min(CHUNK as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err("file shrank while being served".into());
        }
        response.write(buf[..n].to_vec()).await?;
        remaining -= n as u64;
    }
    Ok(())
}

impl Handler for StaticFiles {
    fn call<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(serve(self, ctx))
    }
}
