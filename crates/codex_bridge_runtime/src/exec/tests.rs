use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::timeout;

use super::*;

fn full_args() -> ExecArgs {
    ExecArgs {
        input: "hello".to_owned(),
        base_url: Some("https://example.com".to_owned()),
        api_key: Some("api-key".to_owned()),
        thread_id: Some("thread-123".to_owned()),
        images: vec!["/tmp/img.png".to_owned()],
        model: Some("gpt-4.1-mini".to_owned()),
        sandbox_mode: Some(SandboxMode::ReadOnly),
        working_directory: Some("/work".to_owned()),
        additional_directories: vec!["/extra-a".to_owned(), "/extra-b".to_owned()],
        skip_git_repo_check: true,
        output_schema_file: Some(PathBuf::from("/tmp/schema.json")),
        model_reasoning_effort: Some(ReasoningEffort::High),
        network_access_enabled: Some(true),
        web_search_mode: Some(WebSearchMode::Live),
        web_search_enabled: None,
        approval_policy: Some(ApprovalPolicy::OnRequest),
        signal: None,
    }
}

#[test]
fn command_args_follow_cli_order() {
    assert_eq!(
        full_args().command_args(),
        vec![
            "exec",
            "--experimental-json",
            "--model",
            "gpt-4.1-mini",
            "--sandbox",
            "read-only",
            "--cd",
            "/work",
            "--add-dir",
            "/extra-a",
            "--add-dir",
            "/extra-b",
            "--skip-git-repo-check",
            "--output-schema",
            "/tmp/schema.json",
            "--config",
            "model_reasoning_effort=\"high\"",
            "--config",
            "sandbox_workspace_write.network_access=true",
            "--config",
            "web_search=\"live\"",
            "--config",
            "approval_policy=\"on-request\"",
            "resume",
            "thread-123",
            "--image",
            "/tmp/img.png",
            "-",
        ]
    );
    assert_eq!(
        ExecArgs::new("hi").command_args(),
        vec!["exec", "--experimental-json", "-"]
    );
}

#[test]
fn web_search_enabled_maps_to_mode_and_explicit_mode_wins() {
    let mut args = ExecArgs::new("hi");
    args.web_search_enabled = Some(true);
    assert!(args.command_args().contains(&"web_search=\"live\"".to_owned()));

    args.web_search_enabled = Some(false);
    assert!(args
        .command_args()
        .contains(&"web_search=\"disabled\"".to_owned()));

    args.web_search_mode = Some(WebSearchMode::Cached);
    let rendered = args.command_args();
    assert!(rendered.contains(&"web_search=\"cached\"".to_owned()));
    assert_eq!(
        rendered.iter().filter(|arg| arg.starts_with("web_search=")).count(),
        1
    );
}

#[test]
fn stream_limit_resolution_prefers_explicit_then_env() {
    assert_eq!(
        resolve_stream_limit_bytes(None, None),
        Ok(DEFAULT_STREAM_LIMIT_BYTES)
    );
    assert_eq!(resolve_stream_limit_bytes(None, Some("131072")), Ok(131072));
    assert_eq!(
        resolve_stream_limit_bytes(Some(524288), Some("262144")),
        Ok(524288)
    );

    let err = resolve_stream_limit_bytes(None, Some("not-a-number")).expect_err("invalid env");
    assert!(err.to_string().contains(STREAM_LIMIT_ENV));

    let err = resolve_stream_limit_bytes(Some(1024), None).expect_err("out of range");
    assert!(err.to_string().contains("must be between"));
    assert!(resolve_stream_limit_bytes(Some(MAX_STREAM_LIMIT_BYTES + 1), None).is_err());
    assert_eq!(
        resolve_stream_limit_bytes(Some(MIN_STREAM_LIMIT_BYTES), None),
        Ok(MIN_STREAM_LIMIT_BYTES)
    );
}

#[test]
fn platform_target_triples_cover_supported_pairs() {
    let cases = [
        ("linux", "x86_64", "x86_64-unknown-linux-musl"),
        ("linux", "aarch64", "aarch64-unknown-linux-musl"),
        ("darwin", "x86_64", "x86_64-apple-darwin"),
        ("macos", "arm64", "aarch64-apple-darwin"),
        ("win32", "amd64", "x86_64-pc-windows-msvc"),
        ("windows", "arm64", "aarch64-pc-windows-msvc"),
    ];
    for (os, arch, expected) in cases {
        assert_eq!(platform_target_triple(os, arch), Ok(expected), "{os}/{arch}");
    }

    let err = platform_target_triple("solaris", "sparc").expect_err("unsupported");
    assert!(err.to_string().contains("Unsupported platform"));
}

#[test]
fn codex_path_resolution_order() {
    let never = || -> Result<&'static str, CodexError> { panic!("vendor lookup not expected") };
    assert_eq!(
        resolve_codex_path(Some("/custom/codex".into()), None, never),
        Ok(PathBuf::from("/custom/codex"))
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let binary = if cfg!(windows) { "codex.exe" } else { "codex" };
    std::fs::write(dir.path().join(binary), b"").expect("write fake binary");
    let search = std::env::join_paths([Path::new("/nonexistent-dir"), dir.path()])
        .expect("join paths");
    assert_eq!(
        resolve_codex_path(None, Some(search), never),
        Ok(dir.path().join(binary))
    );

    let fallback = resolve_codex_path(Some(OsString::new()), None, || Ok("dummy-triple"))
        .expect("vendor fallback");
    assert_eq!(
        fallback,
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("vendor")
            .join("dummy-triple")
            .join("codex")
            .join(binary)
    );
}

#[test]
fn child_env_overlays_originator_and_credentials() {
    let mut caller_env = HashMap::new();
    caller_env.insert("FOO".to_owned(), "bar".to_owned());
    let exec = CodexExec::new(Some(PathBuf::from("/bin/codex")), Some(caller_env), Some(123456))
        .expect("exec");
    assert_eq!(exec.stream_limit_bytes(), 123456);

    let env = exec.child_env(&full_args());
    assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));
    assert_eq!(env.get(ORIGINATOR_ENV).map(String::as_str), Some(ORIGINATOR));
    assert_eq!(
        env.get(BASE_URL_ENV).map(String::as_str),
        Some("https://example.com")
    );
    assert_eq!(env.get(API_KEY_ENV).map(String::as_str), Some("api-key"));

    let bare = exec.child_env(&ExecArgs::new("hi"));
    assert!(!bare.contains_key(API_KEY_ENV));
    assert!(!bare.contains_key(BASE_URL_ENV));
}

#[tokio::test(flavor = "current_thread")]
async fn from_receiver_stream_ends_when_sender_drops() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(Ok("a".to_owned())).await.expect("send");
    drop(tx);
    let mut stream = ExecStream::from_receiver(rx);
    assert_eq!(stream.next_line().await, Some(Ok("a".to_owned())));
    assert_eq!(stream.next_line().await, None);
}

#[cfg(unix)]
mod process {
    use std::os::unix::fs::PermissionsExt;

    use pretty_assertions::assert_eq;

    use super::*;

    struct FakeCodex {
        dir: tempfile::TempDir,
        exec: CodexExec,
    }

    impl FakeCodex {
        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.path(name)).expect("read capture")
        }
    }

    /// Write `body` as an executable `codex` script; `$OUT` points at the script dir.
    fn fake_codex(body: &str, stream_limit: Option<usize>) -> FakeCodex {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("codex");
        let source = format!("#!/bin/sh\nOUT='{}'\n{body}\n", dir.path().display());
        std::fs::write(&script, source).expect("write script");
        let mut perms = std::fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let mut env = HashMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_owned(), path);
        }
        env.insert("FOO".to_owned(), "bar".to_owned());
        let exec = CodexExec::new(Some(script), Some(env), stream_limit).expect("exec");
        FakeCodex { dir, exec }
    }

    async fn collect(stream: &mut ExecStream) -> Vec<Result<String, CodexError>> {
        let mut out = Vec::new();
        while let Some(line) = timeout(Duration::from_secs(10), stream.next_line())
            .await
            .expect("stream must finish")
        {
            out.push(line);
        }
        out
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_passes_args_env_and_prompt() {
        let codex = fake_codex(
            r#"printf '%s\n' "$@" > "$OUT/args"
cat > "$OUT/stdin"
printf '%s|%s|%s\n' "$FOO" "$CODEX_INTERNAL_ORIGINATOR_OVERRIDE" "$CODEX_API_KEY" > "$OUT/env"
echo '  line-1  '
echo ''
echo 'line-2'"#,
            None,
        );

        let mut stream = codex.exec.run(full_args()).expect("spawn");
        let lines = collect(&mut stream).await;
        assert_eq!(lines, vec![Ok("line-1".to_owned()), Ok("line-2".to_owned())]);

        let args: Vec<String> = codex.read("args").lines().map(ToOwned::to_owned).collect();
        assert_eq!(args, full_args().command_args());
        assert_eq!(codex.read("stdin"), "hello");
        assert_eq!(codex.read("env"), "bar|codex_sdk_rs|api-key\n");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn non_zero_exit_reports_code_and_stderr() {
        let codex = fake_codex("cat > /dev/null\necho bad >&2\nexit 2", None);
        let mut stream = codex.exec.run(ExecArgs::new("hello")).expect("spawn");
        let lines = collect(&mut stream).await;

        assert_eq!(
            lines,
            vec![Err(CodexError::ExitFailure {
                code: Some(2),
                stderr: "bad\n".to_owned(),
            })]
        );
        let Some(Err(err)) = lines.into_iter().next() else {
            panic!("expected error");
        };
        assert!(err.to_string().contains("exited with code 2"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn large_lines_within_limit_pass_and_longer_lines_fail() {
        let codex = fake_codex(
            "cat > /dev/null\nhead -c 65537 /dev/zero | tr '\\0' 'x'\necho",
            None,
        );
        let mut stream = codex.exec.run(ExecArgs::new("hello")).expect("spawn");
        let lines = collect(&mut stream).await;
        assert_eq!(lines, vec![Ok("x".repeat(65537))]);

        let codex = fake_codex(
            "cat > /dev/null\nhead -c 70000 /dev/zero | tr '\\0' 'y'\necho",
            Some(MIN_STREAM_LIMIT_BYTES),
        );
        let mut stream = codex.exec.run(ExecArgs::new("hello")).expect("spawn");
        let lines = collect(&mut stream).await;
        assert_eq!(
            lines,
            vec![Err(CodexError::LineTooLong {
                limit: MIN_STREAM_LIMIT_BYTES
            })]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancellation_terminates_process_and_drains_output() {
        let codex = fake_codex(
            "cat > /dev/null\necho '{\"type\":\"turn.started\"}'\nexec sleep 30",
            None,
        );
        let signal = CancellationToken::new();
        let mut args = ExecArgs::new("hello");
        args.signal = Some(signal.clone());
        let mut stream = codex.exec.run(args).expect("spawn");

        let first = timeout(Duration::from_secs(10), stream.next_line())
            .await
            .expect("first line");
        assert_eq!(first, Some(Ok("{\"type\":\"turn.started\"}".to_owned())));

        signal.cancel();
        let rest = collect(&mut stream).await;
        assert_eq!(
            rest,
            vec![Err(CodexError::ExitFailure {
                code: None,
                stderr: String::new(),
            })]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn spawn_failure_is_reported() {
        let exec = CodexExec::new(
            Some(PathBuf::from("/nonexistent/codex-binary")),
            Some(HashMap::new()),
            None,
        )
        .expect("exec");
        let err = exec.run(ExecArgs::new("hello")).expect_err("spawn must fail");
        assert!(matches!(err, CodexError::Spawn(_)));
    }
}
