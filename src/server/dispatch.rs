//! Command dispatch loop
//!
//! Owns the repository session slot and processes one framed request at a
//! time: read, decode, dispatch, respond. Ordering is the contract the
//! extension depends on — a response is always written before the next
//! frame is read.

use std::io::{Read, Write};

use tracing::{debug, info, warn};

use super::protocol::{Command, Request, Response, UNKNOWN_FUNCTION_TYPE};
use crate::channel::{read_frame, write_frame, ChannelError, ChannelResult};
use crate::git::{RepoSession, SessionError};

/// The host side of the native messaging channel
///
/// Constructed with an empty session slot; only a successful Initialize
/// populates it. There is no teardown command — dropping the host (or
/// process exit) releases the session.
#[derive(Default)]
pub struct Host {
    session: Option<RepoSession>,
}

impl Host {
    /// Create a host with no session
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a repository session is currently held
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Handle one decoded request and produce its response.
    pub fn handle_request(&mut self, request: Request) -> Response {
        match request.into_command() {
            Command::Initialize {
                repository_url,
                credentials,
            } => {
                debug!(url = %repository_url, "Initialize request");
                // A failed clone must leave the slot empty, not stale
                self.session = None;
                match RepoSession::clone(&repository_url, credentials) {
                    Ok(session) => {
                        info!(url = %repository_url, "Repository cloned");
                        self.session = Some(session);
                        Response::ok()
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Command::Apply {
                target_branch,
                committer,
                entries,
            } => {
                debug!(
                    branch = %target_branch,
                    entries = entries.len(),
                    "Apply request"
                );
                let Some(session) = self.session.as_ref() else {
                    return Response::error(SessionError::NotInitialized.to_string());
                };
                match session.apply(&target_branch, &committer, &entries) {
                    Ok(staged) => {
                        info!(
                            branch = %target_branch,
                            staged = staged.len(),
                            "Pushed update"
                        );
                        Response::ok()
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Command::Unknown => Response::error(UNKNOWN_FUNCTION_TYPE),
        }
    }

    /// Serve requests until the input stream closes.
    ///
    /// Decode failures are reported on the channel and the loop continues;
    /// only channel-level failures terminate it.
    pub fn run<R: Read, W: Write>(&mut self, reader: &mut R, writer: &mut W) -> ChannelResult<()> {
        loop {
            let payload = match read_frame(reader) {
                Ok(payload) => payload,
                Err(ChannelError::Closed) => {
                    info!("Input stream closed, shutting down");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let response = match Request::from_payload(&payload) {
                Ok(request) => self.handle_request(request),
                Err(e) => {
                    warn!(error = %e, "Failed to decode request");
                    Response::error(e.to_string())
                }
            };

            write_frame(writer, &response.to_payload())?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::git::testutil::{remote_url, seed_remote};

    /// Run a sequence of raw request payloads through the loop and return
    /// the decoded responses.
    fn serve(host: &mut Host, payloads: &[&[u8]]) -> Vec<Response> {
        let mut input = Vec::new();
        for payload in payloads {
            write_frame(&mut input, payload).unwrap();
        }
        let mut output = Vec::new();
        host.run(&mut Cursor::new(input), &mut output).unwrap();

        let mut cursor = Cursor::new(output);
        let mut responses = Vec::new();
        loop {
            match read_frame(&mut cursor) {
                Ok(payload) => responses.push(serde_json::from_slice(&payload).unwrap()),
                Err(ChannelError::Closed) => break,
                Err(e) => panic!("Bad response frame: {e}"),
            }
        }
        responses
    }

    #[test]
    fn test_unknown_function_type_response() {
        let mut host = Host::new();
        let responses = serve(&mut host, &[br#"{"functionType":99}"#]);
        assert_eq!(responses, vec![Response::error("Unknown functionType.")]);
        assert!(!host.is_initialized());
    }

    #[test]
    fn test_negative_function_type_response() {
        let mut host = Host::new();
        let responses = serve(&mut host, &[br#"{"functionType":-1}"#]);
        assert_eq!(responses, vec![Response::error("Unknown functionType.")]);
        assert!(!host.is_initialized());
    }

    #[test]
    fn test_apply_before_initialize_fails() {
        let mut host = Host::new();
        let responses = serve(
            &mut host,
            &[br#"{"functionType":2,"targetBranchName":"b","username":"u","email":"e","csvs":[{"path":"a","value":"x"}]}"#],
        );
        assert_eq!(responses.len(), 1);
        let message = responses[0].error_message.as_deref().unwrap();
        assert!(message.contains("not initialized"));
    }

    #[test]
    fn test_malformed_json_keeps_loop_alive() {
        let mut host = Host::new();
        let responses = serve(&mut host, &[b"not json", br#"{"functionType":99}"#]);
        assert_eq!(responses.len(), 2);
        assert!(responses[0].error_message.is_some());
        assert_eq!(responses[1], Response::error("Unknown functionType."));
    }

    #[test]
    fn test_initialize_failure_reported_and_slot_empty() {
        let mut host = Host::new();
        let responses = serve(
            &mut host,
            &[br#"{"functionType":1,"repositoryUrl":"/nonexistent/repo"}"#],
        );
        assert!(responses[0].error_message.is_some());
        assert!(!host.is_initialized());
    }

    #[test]
    fn test_initialize_then_apply_end_to_end() {
        let remote = seed_remote();
        let init = format!(
            r#"{{"functionType":1,"repositoryUrl":"{}"}}"#,
            remote_url(&remote)
        );
        let apply = br#"{"functionType":2,"targetBranchName":"sheet/items","username":"Alice","email":"alice@example.com","csvs":[{"path":"items","value":"id\n1\n"}]}"#;

        let mut host = Host::new();
        let responses = serve(&mut host, &[init.as_bytes(), apply]);
        assert_eq!(responses, vec![Response::ok(), Response::ok()]);
        assert!(host.is_initialized());

        let bare = git2::Repository::open_bare(remote.path()).unwrap();
        let commit = bare
            .find_reference("refs/heads/sheet/items")
            .unwrap()
            .peel_to_commit()
            .unwrap();
        assert_eq!(commit.message(), Some("Update items.csv"));
    }

    #[test]
    fn test_apply_with_no_entries_reports_not_changed() {
        let remote = seed_remote();
        let init = format!(
            r#"{{"functionType":1,"repositoryUrl":"{}"}}"#,
            remote_url(&remote)
        );
        let apply =
            br#"{"functionType":2,"targetBranchName":"sheet/empty","username":"u","email":"e","csvs":[]}"#;

        let mut host = Host::new();
        let responses = serve(&mut host, &[init.as_bytes(), apply]);
        assert_eq!(responses[1], Response::error("Not changed."));
    }

    #[test]
    fn test_second_initialize_replaces_session() {
        let first_remote = seed_remote();
        let second_remote = seed_remote();
        let mut host = Host::new();

        let init_first = format!(
            r#"{{"functionType":1,"repositoryUrl":"{}"}}"#,
            remote_url(&first_remote)
        );
        serve(&mut host, &[init_first.as_bytes()]);
        let first_workdir = host.session.as_ref().unwrap().workdir().to_path_buf();

        let init_second = format!(
            r#"{{"functionType":1,"repositoryUrl":"{}"}}"#,
            remote_url(&second_remote)
        );
        let responses = serve(&mut host, &[init_second.as_bytes()]);
        assert_eq!(responses, vec![Response::ok()]);

        // The first clone is gone along with its working tree
        assert!(!first_workdir.exists());
        assert_ne!(host.session.as_ref().unwrap().workdir(), first_workdir);
    }
}
