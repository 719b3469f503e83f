//! 下载调度器
//!
//! 把一次下载请求翻译成一次子进程调用：按 schema 构建参数、
//! 选择二进制、驱动执行器，并把控制台输出解析成进度与消息事件。

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{LineOutcome, LineParser, ParseState, ProgressTracker};
use crate::runner::{OnLine, RunError, Runner};
use crate::schema::{Schema, SchemaRepository, AUTO_POSTFIX};

use super::types::{
    DownloadCallbacks, DownloadError, DownloadOptions, DownloadParams, Downloader, MessageEvent,
    ProgressEvent, ProgressKind,
};

/// 从 URL 推断文件扩展名
///
/// 大小写无关的子串扫描，未识别时回退 mp4
fn guess_ext_from_url(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if lower.contains(".m3u8") {
        "m3u8"
    } else if lower.contains(".mp4") {
        "mp4"
    } else if lower.contains(".flv") {
        "flv"
    } else if lower.contains(".mkv") {
        "mkv"
    } else {
        "mp4"
    }
}

fn push_kv(out: &mut Vec<String>, flags: &[String], value: &str) {
    for flag in flags {
        out.push(flag.clone());
        out.push(value.to_string());
    }
}

/// 按 schema 构建命令行参数
///
/// 逻辑键之间的先后顺序跟随 HashMap 迭代顺序，不作保证；
/// 下载器对参数顺序不敏感，单个键内部的展开顺序是稳定的
fn build_args(params: &DownloadParams, schema: &Schema, options: &DownloadOptions) -> Vec<String> {
    let mut out = Vec::new();

    for (key, spec) in &schema.args {
        match key.as_str() {
            "url" => {
                out.extend(spec.args_name.iter().cloned());
                out.push(params.url.clone());
            }
            "localDir" => {
                let dir = if params.folder.is_empty() {
                    options.local_dir.clone()
                } else {
                    options.local_dir.join(&params.folder)
                };
                push_kv(&mut out, &spec.args_name, &dir.to_string_lossy());
            }
            "name" => {
                let mut name = params.name.clone();
                if spec.postfix == AUTO_POSTFIX {
                    name.push('.');
                    name.push_str(guess_ext_from_url(&params.url));
                } else {
                    name.push_str(&spec.postfix);
                }
                push_kv(&mut out, &spec.args_name, &name);
            }
            "headers" => {
                for header in &params.headers {
                    push_kv(&mut out, &spec.args_name, header);
                }
            }
            "deleteSegments" => {
                let value = if options.delete_segments { "true" } else { "false" };
                push_kv(&mut out, &spec.args_name, value);
            }
            "proxy" => {
                if !options.proxy.is_empty() {
                    push_kv(&mut out, &spec.args_name, &options.proxy);
                }
            }
            "__common__" => {
                out.extend(spec.args_name.iter().cloned());
            }
            // 未知键忽略
            _ => {}
        }
    }

    out
}

/// 下载调度器
///
/// 除共享的进度节流器外不保存跨任务状态，可并发服务多个下载
pub struct DownloadDispatcher {
    /// 下载类型到可执行文件路径的映射
    binaries: HashMap<crate::downloader::DownloadType, PathBuf>,
    /// 命令执行器
    runner: Arc<dyn Runner>,
    /// Schema 注册表
    schemas: Arc<SchemaRepository>,
    /// 进度节流器
    tracker: Arc<ProgressTracker>,
}

impl DownloadDispatcher {
    pub fn new(
        binaries: HashMap<crate::downloader::DownloadType, PathBuf>,
        runner: Arc<dyn Runner>,
        schemas: Arc<SchemaRepository>,
    ) -> Self {
        Self {
            binaries,
            runner,
            schemas,
            tracker: Arc::new(ProgressTracker::new()),
        }
    }

    /// 构造逐行回调：转发原始消息、解析进度、应用节流
    fn make_line_handler(
        &self,
        params: &DownloadParams,
        schema: &Schema,
        callbacks: DownloadCallbacks,
        last_error: Arc<Mutex<Option<String>>>,
    ) -> OnLine {
        let id = params.id.clone();
        let parser = LineParser::new(schema.console.clone());
        let state = Mutex::new(ParseState::default());
        let tracker = self.tracker.clone();

        Arc::new(move |raw: &str| {
            let line = raw.trim();

            if let Some(on_message) = &callbacks.on_message {
                on_message(MessageEvent {
                    id: id.clone(),
                    message: line.to_string(),
                });
            }

            let mut st = state.lock().unwrap();
            match parser.parse(line, &mut st) {
                LineOutcome::Error(msg) => {
                    // 错误行本身不终止任务，粘滞记录供失败信息引用
                    warn!("下载输出命中错误正则: id={}, line={}", id, msg);
                    *last_error.lock().unwrap() = Some(msg);
                }
                LineOutcome::Ready => {
                    st.ready = true;
                    info!("下载进入就绪状态: id={}, isLive={}", id, st.is_live);
                    if let Some(on_progress) = &callbacks.on_progress {
                        on_progress(ProgressEvent {
                            id: id.clone(),
                            kind: ProgressKind::Ready,
                            percent: 0.0,
                            speed: String::new(),
                            is_live: st.is_live,
                        });
                    }
                }
                LineOutcome::None => {}
            }

            if st.ready && (st.percent > 0.0 || !st.speed.is_empty()) {
                if let Some(on_progress) = &callbacks.on_progress {
                    if tracker.should_update(&id, st.percent, &st.speed) {
                        debug!(
                            "下载进度: id={}, percent={}, speed={}",
                            id, st.percent, st.speed
                        );
                        on_progress(ProgressEvent {
                            id: id.clone(),
                            kind: ProgressKind::Progress,
                            percent: st.percent,
                            speed: st.speed.clone(),
                            is_live: st.is_live,
                        });
                        tracker.update(&id, st.percent, &st.speed);
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Downloader for DownloadDispatcher {
    async fn download(
        &self,
        token: CancellationToken,
        params: DownloadParams,
        options: DownloadOptions,
        callbacks: DownloadCallbacks,
    ) -> Result<(), DownloadError> {
        info!(
            "开始下载任务: id={}, type={}, url={}, name={}",
            params.id, params.download_type, params.url, params.name
        );

        let schema = self
            .schemas
            .get_by_type(params.download_type)
            .ok_or(DownloadError::UnsupportedType(params.download_type))?;

        let bin = self
            .binaries
            .get(&params.download_type)
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(DownloadError::BinaryNotFound(params.download_type))?;
        let bin = bin.to_string_lossy().into_owned();

        let args = build_args(&params, schema, &options);
        debug!("命令行参数构建完成: id={}, args={:?}", params.id, args);

        let last_error = Arc::new(Mutex::new(None::<String>));
        let on_line = self.make_line_handler(&params, schema, callbacks, last_error.clone());

        let result = self.runner.run(token, &bin, &args, on_line).await;

        // 无论成败都清理节流记录
        self.tracker.remove(&params.id);

        match result {
            Ok(()) => {
                info!("下载任务完成: id={}", params.id);
                Ok(())
            }
            Err(RunError::Exit { code }) => {
                let last_error = last_error.lock().unwrap().take();
                Err(DownloadError::ChildExit { code, last_error })
            }
            Err(e) => Err(DownloadError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::DownloadType;
    use crate::schema::{ArgSpec, ConsoleRules};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    fn arg(flags: &[&str], postfix: &str) -> ArgSpec {
        ArgSpec {
            args_name: flags.iter().map(|s| s.to_string()).collect(),
            postfix: postfix.to_string(),
        }
    }

    fn m3u8_schema() -> Schema {
        let mut args = HashMap::new();
        args.insert("url".to_string(), arg(&["-u"], ""));
        args.insert("localDir".to_string(), arg(&["-d"], ""));
        args.insert("name".to_string(), arg(&["-n"], AUTO_POSTFIX));
        args.insert("deleteSegments".to_string(), arg(&["--del"], ""));
        args.insert("__common__".to_string(), arg(&["--quiet"], ""));
        Schema {
            download_type: DownloadType::M3u8,
            args,
            console: ConsoleRules {
                percent: r"([\d.]+)%".to_string(),
                speed: r"([\d.]+MB/s)".to_string(),
                start: r"(?i)start download".to_string(),
                ..Default::default()
            }
            .compile()
            .unwrap(),
        }
    }

    fn sample_params() -> DownloadParams {
        DownloadParams {
            id: "task-1".to_string(),
            download_type: DownloadType::M3u8,
            url: "http://x/y.m3u8".to_string(),
            name: "movie".to_string(),
            folder: "films".to_string(),
            headers: vec![],
        }
    }

    fn sample_options() -> DownloadOptions {
        DownloadOptions {
            local_dir: PathBuf::from("/out"),
            delete_segments: true,
            proxy: String::new(),
        }
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_build_args_multiset() {
        let args = build_args(&sample_params(), &m3u8_schema(), &sample_options());
        let expected = vec![
            "-u",
            "http://x/y.m3u8",
            "-d",
            "/out/films",
            "-n",
            "movie.m3u8",
            "--del",
            "true",
            "--quiet",
        ];
        // 键间顺序不保证，按多重集比较
        assert_eq!(
            sorted(args),
            sorted(expected.into_iter().map(String::from).collect())
        );
    }

    #[test]
    fn test_build_args_deterministic() {
        let params = sample_params();
        let schema = m3u8_schema();
        let options = sample_options();
        let a = sorted(build_args(&params, &schema, &options));
        let b = sorted(build_args(&params, &schema, &options));
        assert_eq!(a, b);
    }

    #[test]
    fn test_build_args_empty_folder_uses_root() {
        let mut params = sample_params();
        params.folder = String::new();
        let args = build_args(&params, &m3u8_schema(), &sample_options());
        assert!(args.contains(&"/out".to_string()));
        assert!(!args.iter().any(|a| a.contains("films")));
    }

    #[test]
    fn test_build_args_headers_repeat_flag() {
        let mut schema = m3u8_schema();
        schema.args.insert("headers".to_string(), arg(&["-H"], ""));
        let mut params = sample_params();
        params.headers = vec!["User-Agent: x".to_string(), "Cookie: y".to_string()];
        let args = build_args(&params, &schema, &sample_options());
        assert_eq!(args.iter().filter(|a| a.as_str() == "-H").count(), 2);
        assert!(args.contains(&"User-Agent: x".to_string()));
        assert!(args.contains(&"Cookie: y".to_string()));
    }

    #[test]
    fn test_build_args_proxy_only_when_set() {
        let mut schema = m3u8_schema();
        schema.args.insert("proxy".to_string(), arg(&["--proxy"], ""));
        let params = sample_params();

        let args = build_args(&params, &schema, &sample_options());
        assert!(!args.contains(&"--proxy".to_string()));

        let mut options = sample_options();
        options.proxy = "http://127.0.0.1:7890".to_string();
        let args = build_args(&params, &schema, &options);
        assert!(args.contains(&"--proxy".to_string()));
        assert!(args.contains(&"http://127.0.0.1:7890".to_string()));
    }

    #[test]
    fn test_build_args_delete_segments_false_still_emitted() {
        let mut options = sample_options();
        options.delete_segments = false;
        let args = build_args(&sample_params(), &m3u8_schema(), &options);
        assert!(args.contains(&"--del".to_string()));
        assert!(args.contains(&"false".to_string()));
    }

    #[test]
    fn test_build_args_unknown_key_ignored() {
        let mut schema = m3u8_schema();
        schema
            .args
            .insert("mystery".to_string(), arg(&["--mystery"], ""));
        let args = build_args(&sample_params(), &schema, &sample_options());
        assert!(!args.contains(&"--mystery".to_string()));
    }

    #[test]
    fn test_build_args_name_literal_postfix() {
        let mut schema = m3u8_schema();
        schema.args.insert("name".to_string(), arg(&["-n"], ".ts"));
        let args = build_args(&sample_params(), &schema, &sample_options());
        assert!(args.contains(&"movie.ts".to_string()));
    }

    #[test]
    fn test_guess_ext_case_insensitive_and_idempotent() {
        assert_eq!(guess_ext_from_url("http://x/Y.M3U8?sig=1"), "m3u8");
        assert_eq!(guess_ext_from_url("http://x/v.MP4"), "mp4");
        assert_eq!(guess_ext_from_url("http://x/v.flv"), "flv");
        assert_eq!(guess_ext_from_url("http://x/v.MKV"), "mkv");
        assert_eq!(guess_ext_from_url("http://x/v"), "mp4");
        // 幂等
        assert_eq!(
            guess_ext_from_url("http://x/Y.M3U8"),
            guess_ext_from_url("http://x/Y.M3U8")
        );
    }

    /// 按脚本回放固定行序列的执行器
    struct ScriptedRunner {
        lines: Vec<String>,
        result: StdMutex<Option<Result<(), RunError>>>,
    }

    impl ScriptedRunner {
        fn new(lines: &[&str], result: Result<(), RunError>) -> Self {
            Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                result: StdMutex::new(Some(result)),
            }
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn run(
            &self,
            _token: CancellationToken,
            _bin_path: &str,
            _args: &[String],
            on_line: OnLine,
        ) -> Result<(), RunError> {
            for line in &self.lines {
                on_line(line);
            }
            self.result.lock().unwrap().take().unwrap()
        }
    }

    fn repo_with(schema: Schema) -> Arc<SchemaRepository> {
        Arc::new(SchemaRepository::from_schemas(vec![schema]))
    }

    fn dispatcher_with(runner: Arc<dyn Runner>, schema: Schema) -> DownloadDispatcher {
        let mut binaries = HashMap::new();
        binaries.insert(schema.download_type, PathBuf::from("/usr/local/bin/fake"));
        DownloadDispatcher::new(binaries, runner, repo_with(schema))
    }

    fn collect_events() -> (
        DownloadCallbacks,
        Arc<StdMutex<Vec<ProgressEvent>>>,
        Arc<StdMutex<Vec<MessageEvent>>>,
    ) {
        let progress = Arc::new(StdMutex::new(Vec::new()));
        let messages = Arc::new(StdMutex::new(Vec::new()));
        let p = progress.clone();
        let m = messages.clone();
        let callbacks = DownloadCallbacks {
            on_progress: Some(Arc::new(move |e| p.lock().unwrap().push(e))),
            on_message: Some(Arc::new(move |e| m.lock().unwrap().push(e))),
        };
        (callbacks, progress, messages)
    }

    #[tokio::test]
    async fn test_download_unsupported_type() {
        let runner = Arc::new(ScriptedRunner::new(&[], Ok(())));
        let dispatcher = dispatcher_with(runner, m3u8_schema());
        let mut params = sample_params();
        params.download_type = DownloadType::Bilibili;
        let err = dispatcher
            .download(
                CancellationToken::new(),
                params,
                sample_options(),
                DownloadCallbacks::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn test_download_binary_not_found() {
        let runner: Arc<dyn Runner> = Arc::new(ScriptedRunner::new(&[], Ok(())));
        let schema = m3u8_schema();
        let dispatcher = DownloadDispatcher::new(HashMap::new(), runner, repo_with(schema));
        let err = dispatcher
            .download(
                CancellationToken::new(),
                sample_params(),
                sample_options(),
                DownloadCallbacks::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::BinaryNotFound(_)));
    }

    #[tokio::test]
    async fn test_download_emits_ready_then_progress() {
        let runner = Arc::new(ScriptedRunner::new(
            &["Start Download movie", "10.0% 1.0MB/s", "99.9% 2.0MB/s"],
            Ok(()),
        ));
        let dispatcher = dispatcher_with(runner, m3u8_schema());
        let (callbacks, progress, messages) = collect_events();

        dispatcher
            .download(
                CancellationToken::new(),
                sample_params(),
                sample_options(),
                callbacks,
            )
            .await
            .unwrap();

        let progress = progress.lock().unwrap();
        assert_eq!(progress[0].kind, ProgressKind::Ready);
        assert!(progress.iter().any(|e| e.kind == ProgressKind::Progress && e.percent == 10.0));
        // 原始消息逐行转发，不节流
        assert_eq!(messages.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_download_throttles_dense_progress() {
        // 与节流测试同构的场景：小步进度在窗口内被抑制
        let runner = Arc::new(ScriptedRunner::new(
            &[
                "1.0% 1MB/s", "1.1% 1MB/s", "1.2% 1MB/s", "1.3% 1MB/s", "1.4% 1MB/s",
                "2.0% 1MB/s",
            ],
            Ok(()),
        ));
        let dispatcher = dispatcher_with(runner, m3u8_schema());
        let (callbacks, progress, _messages) = collect_events();

        dispatcher
            .download(
                CancellationToken::new(),
                sample_params(),
                sample_options(),
                callbacks,
            )
            .await
            .unwrap();

        let progress = progress.lock().unwrap();
        let progress_events: Vec<_> = progress
            .iter()
            .filter(|e| e.kind == ProgressKind::Progress)
            .collect();
        // 首条（1.0）与跨过 0.5 阈值的一条（2.0）
        assert_eq!(progress_events.len(), 2);
        assert_eq!(progress_events[0].percent, 1.0);
        assert_eq!(progress_events[1].percent, 2.0);
    }

    #[tokio::test]
    async fn test_download_nonzero_exit_includes_last_error_line() {
        let mut schema = m3u8_schema();
        schema.console = ConsoleRules {
            percent: r"([\d.]+)%".to_string(),
            error: r"(?i)error".to_string(),
            ..Default::default()
        }
        .compile()
        .unwrap();
        let runner = Arc::new(ScriptedRunner::new(
            &["10%", "ERROR: segment 42 unreachable"],
            Err(RunError::Exit { code: 2 }),
        ));
        let dispatcher = dispatcher_with(runner, schema);

        let err = dispatcher
            .download(
                CancellationToken::new(),
                sample_params(),
                sample_options(),
                DownloadCallbacks::default(),
            )
            .await
            .unwrap_err();
        match err {
            DownloadError::ChildExit { code, last_error } => {
                assert_eq!(code, 2);
                assert_eq!(last_error.as_deref(), Some("ERROR: segment 42 unreachable"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_cancellation_propagates() {
        let runner = Arc::new(ScriptedRunner::new(&[], Err(RunError::Cancelled)));
        let dispatcher = dispatcher_with(runner, m3u8_schema());
        let err = dispatcher
            .download(
                CancellationToken::new(),
                sample_params(),
                sample_options(),
                DownloadCallbacks::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
