//! The Smart-HTTP Git front-end. Mounts `/info/refs` and
//! `/{service}` per repository, authenticates callers, pipes request/
//! response bytes through the real `git-upload-pack`/`git-receive-pack`
//! helpers, and extracts ref-update events from the receive-pack report to
//! publish on the push event bus.

mod auth;
pub mod pktline;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::io::ReaderStream;

use crate::config::AppState;
use crate::events::{ChangeType, PushEvent, RefChange};

const UPLOAD_PACK: &str = "git-upload-pack";
const RECEIVE_PACK: &str = "git-receive-pack";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:repo/info/refs", get(info_refs))
        .route("/:repo/:service", post(service_handler))
}

/// `git-upload-pack`/`git-receive-pack` are invoked as `git`'s built-in
/// subcommands (`git upload-pack`, not a separately-named executable), so
/// the configured `git` binary can always be used regardless of whether the
/// standalone helper binaries are on `PATH`.
fn git_subcommand(service: &str) -> &str {
    service.strip_prefix("git-").unwrap_or(service)
}

fn validate_service(service: &str) -> Result<(), Response> {
    match service {
        UPLOAD_PACK | RECEIVE_PACK => Ok(()),
        "" => Err((StatusCode::BAD_REQUEST, "dumb protocol not supported").into_response()),
        _ => Err((StatusCode::BAD_REQUEST, "unknown service").into_response()),
    }
}

fn read_access_key(state: &AppState, repo: &str) -> Result<String, Response> {
    let git_repo = state
        .repo_manager
        .get(repo)
        .map_err(IntoResponse::into_response)?;
    git_repo
        .config_get("lunchbadger.accesskey")
        .map_err(IntoResponse::into_response)
}

async fn info_refs(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let service = params.get("service").map(String::as_str).unwrap_or("");
    if let Err(resp) = validate_service(service) {
        return resp;
    }
    if !state.repo_manager.exists(&repo) {
        return (StatusCode::NOT_FOUND, "repository does not exist").into_response();
    }
    let access_key = match read_access_key(&state, &repo) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    if let Err(unauth) =
        auth::authenticate(&headers, remote.ip(), state.config.auth_on_private_networks, &access_key)
    {
        return unauth.into_response();
    }

    let repo_path = state.repo_manager.path(&repo);
    let output = Command::new(&state.config.git_binary)
        .arg(git_subcommand(service))
        .arg("--stateless-rpc")
        .arg("--advertise-refs")
        .arg(&repo_path)
        .output()
        .await;
    let output = match output {
        Ok(o) => o,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("spawning {service}: {e}"),
            )
                .into_response()
        }
    };

    let mut body = pktline::encode(format!("# service={service}\n").as_bytes());
    body.extend_from_slice(pktline::FLUSH_PACKET);
    body.extend_from_slice(&output.stdout);

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("application/x-{service}-advertisement"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn service_handler(
    State(state): State<Arc<AppState>>,
    Path((repo, service)): Path<(String, String)>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Err(resp) = validate_service(&service) {
        return resp;
    }
    let expected_content_type = format!("application/x-{service}-request");
    match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(ct) if ct == expected_content_type => {}
        _ => return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported content type").into_response(),
    }
    if !state.repo_manager.exists(&repo) {
        return (StatusCode::NOT_FOUND, "repository does not exist").into_response();
    }
    let access_key = match read_access_key(&state, &repo) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    if let Err(unauth) =
        auth::authenticate(&headers, remote.ip(), state.config.auth_on_private_networks, &access_key)
    {
        return unauth.into_response();
    }

    let repo_path = state.repo_manager.path(&repo);
    let mut child = match Command::new(&state.config.git_binary)
        .arg(git_subcommand(&service))
        .arg("--stateless-rpc")
        .arg(&repo_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("spawning {service}: {e}"),
            )
                .into_response()
        }
    };

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let stdout = child.stdout.take().expect("stdout was piped");

    tokio::spawn(async move {
        let mut body_stream = body.into_data_stream();
        while let Some(chunk) = body_stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("reading request body: {e}");
                    break;
                }
            }
        }
    });

    let result_content_type = format!("application/x-{service}-result");

    if service == RECEIVE_PACK {
        // The receive-pack report is the small textual protocol reply, not
        // pack data, so buffering it whole to tee it is fine - pack data only
        // flows in the (never buffered here) upload-pack direction below.
        let mut stdout = stdout;
        let mut report = Vec::new();
        if let Err(e) = stdout.read_to_end(&mut report).await {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("reading {service} output: {e}"),
            )
                .into_response();
        }
        match child.wait().await {
            Ok(status) if status.success() => {
                let changes = parse_receive_report(&report);
                if !changes.is_empty() {
                    state.event_bus.publish(PushEvent {
                        repo: repo.clone(),
                        changes,
                    });
                }
            }
            Ok(status) => {
                log::warn!("{service} for {repo} exited with {status}");
            }
            Err(e) => log::warn!("waiting on {service} for {repo}: {e}"),
        }
        (StatusCode::OK, [(header::CONTENT_TYPE, result_content_type)], report).into_response()
    } else {
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                log::warn!("waiting on {service}: {e}");
            }
        });
        let response_body = Body::from_stream(ReaderStream::new(stdout));
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, result_content_type)],
            response_body,
        )
            .into_response()
    }
}

/// Parses the receive-pack stdout stream: discards the first pkt-line
/// packet (the per-push status header) then reads the remainder - the
/// report our `post-receive` hook copied through - as `<before> <after>
/// <ref>` lines.
fn parse_receive_report(bytes: &[u8]) -> Vec<RefChange> {
    let mut payloads = pktline::Reader::new(bytes).filter_map(|p| match p {
        pktline::Packet::Data(d) => Some(d),
        pktline::Packet::Flush => None,
    });
    payloads.next(); // per-push status header packet
    let remainder: Vec<u8> = payloads.flatten().collect();
    parse_ref_update_lines(&remainder)
}

fn parse_ref_update_lines(bytes: &[u8]) -> Vec<RefChange> {
    let text = String::from_utf8_lossy(bytes);
    let mut changes = Vec::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(before), Some(after), Some(refname)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if let Some(name) = refname.strip_prefix("refs/heads/") {
            changes.push(RefChange {
                change_type: ChangeType::Head,
                ref_name: name.to_string(),
                before: before.to_string(),
                after: after.to_string(),
            });
        } else if let Some(name) = refname.strip_prefix("refs/tags/") {
            changes.push(RefChange {
                change_type: ChangeType::Tag,
                ref_name: name.to_string(),
                before: before.to_string(),
                after: after.to_string(),
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_subcommand_strips_prefix() {
        assert_eq!(git_subcommand(UPLOAD_PACK), "upload-pack");
        assert_eq!(git_subcommand(RECEIVE_PACK), "receive-pack");
    }

    #[test]
    fn validate_service_accepts_known_services() {
        assert!(validate_service(UPLOAD_PACK).is_ok());
        assert!(validate_service(RECEIVE_PACK).is_ok());
    }

    #[test]
    fn validate_service_rejects_unknown_and_empty() {
        assert!(validate_service("").is_err());
        assert!(validate_service("git-archive").is_err());
    }

    #[test]
    fn parse_ref_update_lines_extracts_head_and_tag_changes() {
        let before = "a".repeat(40);
        let after = "b".repeat(40);
        let line = format!("{before} {after} refs/heads/dev\n{before} {after} refs/tags/v1\n");
        let changes = parse_ref_update_lines(line.as_bytes());
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0].change_type, ChangeType::Head));
        assert_eq!(changes[0].ref_name, "dev");
        assert!(matches!(changes[1].change_type, ChangeType::Tag));
        assert_eq!(changes[1].ref_name, "v1");
    }

    #[test]
    fn parse_ref_update_lines_ignores_malformed_lines() {
        assert!(parse_ref_update_lines(b"not enough fields").is_empty());
    }

    #[test]
    fn parse_receive_report_discards_first_packet() {
        let before = "0".repeat(40);
        let after = "1".repeat(40);
        let mut bytes = pktline::encode(b"unpack ok\n");
        bytes.extend(pktline::encode(
            format!("{before} {after} refs/heads/dev\n").as_bytes(),
        ));
        bytes.extend_from_slice(pktline::FLUSH_PACKET);
        let changes = parse_receive_report(&bytes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].ref_name, "dev");
    }
}
