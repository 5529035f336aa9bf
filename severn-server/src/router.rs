//! Command dispatch.
//!
//! Takes a parsed request, validates it, and drives the backend. Response
//! messages are part of the client contract; clients parse the redirect
//! message to find the leader.

use chrono::Duration;

use severn_core::protocol::{Request, Response};
use severn_core::Value;

use crate::backend::Backend;

pub async fn process(backend: &dyn Backend, request: &Request) -> Response {
    match request.op.to_uppercase().as_str() {
        "SET" => {
            if let Some(resp) = validate_key(&request.key) {
                return resp;
            }
            if request.value.contains('\n') {
                return Response::error("Value must not contain a newline");
            }

            let value = Value::new(request.value.clone(), Duration::nanoseconds(request.expires_in));
            match backend.set(&request.key, value).await {
                Ok(()) => Response::success(),
                Err(e) => mutation_failure(backend, e).await,
            }
        }

        "GET" => {
            if let Some(resp) = validate_key(&request.key) {
                return resp;
            }

            match backend.get(&request.key).await {
                Some(value) => {
                    // TTL is fetched alongside, best effort; a miss between
                    // the two lookups just omits the field.
                    let ttl = backend.ttl(&request.key).await.map(nanos);
                    let mut resp = Response::success().with_value(value.data);
                    resp.ttl = ttl;
                    resp
                }
                None => Response::error("Key not found"),
            }
        }

        "DELETE" => {
            if let Some(resp) = validate_key(&request.key) {
                return resp;
            }

            match backend.delete(&request.key).await {
                Ok(()) => Response::success(),
                Err(e) => mutation_failure(backend, e).await,
            }
        }

        "TTL" => {
            if let Some(resp) = validate_key(&request.key) {
                return resp;
            }

            match backend.ttl(&request.key).await {
                Some(remaining) => Response::success().with_ttl(nanos(remaining)),
                None => Response::error("Key not found or expired"),
            }
        }

        "STATUS" => {
            let role = if backend.is_leader() {
                "leader"
            } else {
                "follower"
            };
            Response::success().with_message(format!("Node status: {}", role))
        }

        _ => Response::error("Unknown command"),
    }
}

async fn mutation_failure(backend: &dyn Backend, err: severn_core::KvError) -> Response {
    if err.is_not_leader() {
        let leader_addr = backend.leader_addr().await;
        return Response::redirect(format!("Not the leader, try: {}", leader_addr));
    }
    Response::error(err.to_string())
}

fn validate_key(key: &str) -> Option<Response> {
    if key.is_empty() {
        return Some(Response::error("Key is required"));
    }
    if key.contains(char::is_whitespace) {
        return Some(Response::error("Key must not contain whitespace"));
    }
    None
}

fn nanos(d: Duration) -> i64 {
    d.num_nanoseconds().unwrap_or(i64::MAX)
}
