//! Static file serving module
//!
//! Path resolution against the serving root, file loading, and response
//! building for the root and image routes.

use crate::config::AppState;
use crate::handler::router::RequestContext;
use crate::http::{self, cache, mime};
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Failure modes for a single file lookup
#[derive(Debug, Error)]
pub enum ServeError {
    /// Missing file, non-regular file, or a path escaping the serving root
    #[error("file not found")]
    NotFound,
    /// Unexpected filesystem failure (permissions, hardware, ...)
    #[error("filesystem fault: {0}")]
    Fault(std::io::Error),
}

/// Serve a request path relative to the serving root
///
/// The empty path (`/`) substitutes the configured entry file.
pub async fn serve_root(ctx: &RequestContext<'_>, state: &AppState) -> Response<Full<Bytes>> {
    let trimmed = ctx.path.trim_start_matches('/');
    let relative = if trimmed.is_empty() {
        state.config.site.index_file.as_str()
    } else {
        trimmed
    };

    match load_file(&state.root, relative).await {
        Ok((content, resolved)) => {
            let content_type = mime::from_path(&resolved);
            let etag = cache::generate_etag(&content);
            if cache::check_etag_match(ctx.if_none_match.as_deref(), &etag) {
                return http::build_304_response(&etag);
            }
            http::response::build_file_response(
                Bytes::from(content),
                content_type,
                &etag,
                ctx.is_head,
            )
        }
        Err(err) => error_response(&err, ctx.path),
    }
}

/// Serve a file from the image directory
///
/// Content type is pinned to `image/jpeg` whatever the file extension says,
/// and every response carries the cache-suppression header set.
pub async fn serve_image(
    ctx: &RequestContext<'_>,
    state: &AppState,
    filename: &str,
) -> Response<Full<Bytes>> {
    match load_file(&state.images_root(), filename).await {
        Ok((content, _)) => {
            let etag = cache::generate_etag(&content);
            if cache::check_etag_match(ctx.if_none_match.as_deref(), &etag) {
                return http::build_image_304_response(&etag);
            }
            http::response::build_image_response(Bytes::from(content), &etag, ctx.is_head)
        }
        Err(err) => error_response(&err, ctx.path),
    }
}

/// Map a lookup failure onto the wire
///
/// Traversal attempts and missing files are indistinguishable to the client.
fn error_response(err: &ServeError, path: &str) -> Response<Full<Bytes>> {
    match err {
        ServeError::NotFound => http::build_404_response(),
        ServeError::Fault(e) => {
            logger::log_error(&format!("Failed to serve '{path}': {e}"));
            http::build_500_response()
        }
    }
}

/// Load a file beneath `base`, refusing anything that resolves outside it
async fn load_file(base: &Path, relative: &str) -> Result<(Vec<u8>, PathBuf), ServeError> {
    let resolved = resolve(base, relative).await?;
    match fs::read(&resolved).await {
        Ok(content) => Ok((content, resolved)),
        Err(e) => Err(classify_io(e)),
    }
}

/// Resolve `relative` against `base` and enforce containment
///
/// Both sides are canonicalized, so `..` segments and symlinks pointing
/// outside the base fall to a single prefix check. Only regular files pass.
async fn resolve(base: &Path, relative: &str) -> Result<PathBuf, ServeError> {
    let base = fs::canonicalize(base).await.map_err(classify_io)?;
    let resolved = fs::canonicalize(base.join(relative))
        .await
        .map_err(classify_io)?;

    if !resolved.starts_with(&base) {
        logger::log_warning(&format!(
            "Path traversal attempt blocked: {relative} -> {}",
            resolved.display()
        ));
        return Err(ServeError::NotFound);
    }

    let meta = fs::metadata(&resolved).await.map_err(classify_io)?;
    if !meta.is_file() {
        return Err(ServeError::NotFound);
    }
    Ok(resolved)
}

/// Sort I/O errors into the two wire-visible classes
fn classify_io(err: std::io::Error) -> ServeError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory | ErrorKind::InvalidInput => {
            ServeError::NotFound
        }
        _ => ServeError::Fault(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppState, Config};
    use http_body_util::BodyExt;
    use std::fs as std_fs;
    use tempfile::TempDir;

    /// Scratch site: index.html ("HELLO"), notes.txt, images/a.png
    fn scaffold() -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std_fs::write(dir.path().join("index.html"), b"HELLO").unwrap();
        std_fs::write(dir.path().join("notes.txt"), b"some notes").unwrap();
        std_fs::create_dir(dir.path().join("images")).unwrap();
        std_fs::write(dir.path().join("images").join("a.png"), b"\x89PNG-ish bytes").unwrap();
        dir
    }

    fn test_state(root: &Path) -> AppState {
        let mut cfg = Config::load_from("nonexistent-config").expect("defaults");
        cfg.site.root = root.to_str().unwrap().to_string();
        AppState::new(cfg).expect("state")
    }

    fn test_ctx(path: &str) -> RequestContext<'_> {
        RequestContext {
            path,
            is_head: false,
            if_none_match: None,
        }
    }

    async fn body_of(resp: Response<Full<Bytes>>) -> Bytes {
        resp.into_body().collect().await.expect("body").to_bytes()
    }

    #[tokio::test]
    async fn test_load_file_returns_bytes() {
        let dir = scaffold();
        let (content, resolved) = load_file(dir.path(), "notes.txt").await.expect("load");
        assert_eq!(content, b"some notes");
        assert!(resolved.ends_with("notes.txt"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = scaffold();
        let err = load_file(dir.path(), "nope.txt").await.unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let dir = scaffold();
        let err = load_file(dir.path(), "images").await.unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
    }

    #[tokio::test]
    async fn test_traversal_out_of_base_is_blocked() {
        let dir = scaffold();
        let images = dir.path().join("images");
        // index.html exists, but lies outside the image base
        let err = load_file(&images, "../index.html").await.unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
    }

    #[tokio::test]
    async fn test_traversal_out_of_root_is_blocked() {
        let outer = tempfile::tempdir().expect("tempdir");
        let root = outer.path().join("site");
        std_fs::create_dir(&root).unwrap();
        std_fs::write(outer.path().join("secret.txt"), b"do not serve").unwrap();

        let err = load_file(&root, "../secret.txt").await.unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
    }

    #[tokio::test]
    async fn test_dotdot_resolving_inside_base_is_served() {
        let dir = scaffold();
        let (content, _) = load_file(dir.path(), "images/../index.html")
            .await
            .expect("resolves inside the root");
        assert_eq!(content, b"HELLO");
    }

    #[tokio::test]
    async fn test_serve_root_substitutes_index() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let resp = serve_root(&test_ctx("/"), &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Type"], "text/html; charset=utf-8");
        assert_eq!(body_of(resp).await, Bytes::from_static(b"HELLO"));
    }

    #[tokio::test]
    async fn test_serve_root_matches_explicit_index() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let implicit = body_of(serve_root(&test_ctx("/"), &state).await).await;
        let explicit = body_of(serve_root(&test_ctx("/index.html"), &state).await).await;
        assert_eq!(implicit, explicit);
    }

    #[tokio::test]
    async fn test_serve_root_missing_is_404() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let resp = serve_root(&test_ctx("/nope.txt"), &state).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_serve_image_forces_jpeg_and_no_cache() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let ctx = test_ctx("/images/a.png");
        let resp = serve_image(&ctx, &state, "a.png").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Type"], "image/jpeg");
        assert_eq!(
            resp.headers()["Cache-Control"],
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(resp.headers()["Pragma"], "no-cache");
        assert_eq!(resp.headers()["Expires"], "0");
        assert_eq!(body_of(resp).await, Bytes::from_static(b"\x89PNG-ish bytes"));
    }

    #[tokio::test]
    async fn test_serve_image_missing_is_404() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let ctx = test_ctx("/images/missing.png");
        let resp = serve_image(&ctx, &state, "missing.png").await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_serve_image_never_escapes_images_dir() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let ctx = test_ctx("/images/../index.html");
        let resp = serve_image(&ctx, &state, "../index.html").await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_conditional_get_returns_304() {
        let dir = scaffold();
        let state = test_state(dir.path());

        let first = serve_root(&test_ctx("/index.html"), &state).await;
        let etag = first.headers()["ETag"].to_str().unwrap().to_string();

        let ctx = RequestContext {
            path: "/index.html",
            is_head: false,
            if_none_match: Some(etag.clone()),
        };
        let second = serve_root(&ctx, &state).await;
        assert_eq!(second.status(), 304);
        assert_eq!(second.headers()["ETag"].to_str().unwrap(), etag);
        assert!(body_of(second).await.is_empty());
    }

    #[tokio::test]
    async fn test_head_has_empty_body_and_full_length() {
        let dir = scaffold();
        let state = test_state(dir.path());
        let ctx = RequestContext {
            path: "/index.html",
            is_head: true,
            if_none_match: None,
        };
        let resp = serve_root(&ctx, &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Length"], "5");
        assert!(body_of(resp).await.is_empty());
    }
}
