//! Request timing header

use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub static X_PROCESS_TIME: HeaderName = HeaderName::from_static("x-process-time");

/// Adds `X-Process-Time` with the seconds spent below this stage
pub async fn process_time_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = format!("{:.3}", start.elapsed().as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        response.headers_mut().insert(X_PROCESS_TIME.clone(), value);
    }
    response
}
