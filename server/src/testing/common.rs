use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{body::Body, http::Response, Router};
use indexmap::IndexMap;
use lib_email_clients::{MailTransport, SentMessage, TransportError};
use serde_json::Value;
use tempfile::TempDir;

use crate::{
    email::{InlineMap, TemplateCatalog, TemplateEntry},
    routes::AppRouter,
    server_config::{MailConfig, RetryConfig, ServerConfig, Settings, SheetsConfig},
    sheets::{
        client::RowSpan, materialize::Grid, Columns, NoiseRules, SchemaRules, SearchConfig,
        SheetRange, TabularSource,
    },
    ServerState,
};

type FailureFn = Box<dyn Fn() -> anyhow::Error + Send + Sync>;

/// Tables held in memory, read the way the Sheets API answers: a single row
/// range past the end is empty, an unknown table is empty.
#[derive(Default)]
pub struct InMemorySheets {
    tables: HashMap<String, Grid>,
    failure: Option<FailureFn>,
    reads: Mutex<Vec<String>>,
}

impl InMemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, rows: &[&[&str]]) -> Self {
        let grid = rows
            .iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect();
        self.tables.insert(name.to_string(), grid);
        self
    }

    /// Every read fails with the error `make` builds.
    pub fn failing(make: impl Fn() -> anyhow::Error + Send + Sync + 'static) -> Self {
        Self {
            failure: Some(Box::new(make)),
            ..Self::default()
        }
    }

    /// A1 ranges read so far, in call order.
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabularSource for InMemorySheets {
    async fn read(&self, range: &SheetRange) -> anyhow::Result<Grid> {
        self.reads.lock().unwrap().push(range.a1());
        if let Some(make) = &self.failure {
            return Err(make());
        }

        let Some(grid) = self.tables.get(&range.table) else {
            return Ok(Grid::new());
        };
        Ok(match range.rows {
            RowSpan::Open => grid.clone(),
            RowSpan::Single(n) => grid
                .get(n.saturating_sub(1) as usize)
                .cloned()
                .into_iter()
                .collect(),
        })
    }
}

/// Records every payload. Scripted failures are returned first, after which
/// every send succeeds with `msg-{attempt}`.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<TransportError>>,
    sent: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn scripted(failures: Vec<Result<(), TransportError>>) -> Self {
        Self {
            script: Mutex::new(failures.into_iter().filter_map(Result::err).collect()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn send_raw(&self, raw: &str) -> Result<SentMessage, TransportError> {
        let attempt = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(raw.to_string());
            sent.len()
        };
        match self.script.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(SentMessage {
                id: format!("msg-{attempt}"),
                thread_id: None,
            }),
        }
    }
}

pub fn test_config() -> ServerConfig {
    test_config_in(Path::new("."))
}

pub fn test_config_in(root: &Path) -> ServerConfig {
    let templates = vec![
        TemplateEntry {
            id: "plain.html".into(),
            label: "Plain".into(),
            default_subject: "안내드립니다".into(),
            inline: InlineMap::new(),
        },
        TemplateEntry {
            id: "guide.html".into(),
            label: "Guide".into(),
            default_subject: "[가이드] 사용 방법".into(),
            inline: InlineMap::from([("img1".to_string(), "assets/email/step1.png".to_string())]),
        },
    ];

    ServerConfig {
        root: root.to_path_buf(),
        settings: Settings {
            port: 8080,
            origin: "http://localhost:3000".into(),
            asset_base: "http://localhost:3000".into(),
        },
        sheets: SheetsConfig {
            spreadsheet_id: "sheet-test".into(),
            table_y: "트라이얼(Y)".into(),
            table_n: "트라이얼(N)".into(),
        },
        columns: Columns::default(),
        schema: SchemaRules::default(),
        noise: NoiseRules::default(),
        search: SearchConfig::default(),
        mail: MailConfig {
            from: "Trials <trials@example.com>".into(),
            bcc: Some("archive@example.com".into()),
            default_template: "guide.html".into(),
            timezone: "Asia/Seoul".into(),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1000,
            },
        },
        timezone: chrono_tz::Asia::Seoul,
        catalog: TemplateCatalog::new(templates, &InlineMap::new()),
        sender: IndexMap::from([
            ("sender_name".to_string(), "김서은".to_string()),
            ("sender_title".to_string(), "프로".to_string()),
        ]),
        google_client: None,
    }
}

/// Both tables with one summary row, one empty row and one percentage row.
/// 트라이얼(N):2 has no email.
pub fn trial_sheets() -> InMemorySheets {
    InMemorySheets::new()
        .with_table(
            "트라이얼(Y)",
            &[
                &["유입월", "회사명", "담당자", "이메일", "D7", "M1", "D7", "M1"],
                &["8월", "가나상사", "김철수", "kim@ga.na", "10%", "5%", "20%", ""],
                &["8월 합계", "", "", "", "12%"],
                &["8월", "다라물산", "이영희", "lee@da.ra"],
            ],
        )
        .with_table(
            "트라이얼(N)",
            &[
                &["유입월", "회사명", "담당자", "이메일"],
                &["7월", "마바건설", "박민수", ""],
                &[],
                &["", "", "", "", "", "%"],
            ],
        )
}

const PLAIN_TEMPLATE: &str = "<p>{{ company }} {{ manager }}님, {{ sender_name }} {{ sender_title }}입니다.</p>";

const GUIDE_TEMPLATE: &str = r#"<h1>{{ subject }}</h1>
<p>{{ manager }}님, {{ now() }}</p>
<img src="{{ cid('img1') }}">
<img src="cid:unknown">
"#;

/// A router over a temporary config root holding the templates and the
/// inline image they reference.
pub struct TestApp {
    pub dir: TempDir,
    pub state: ServerState,
    pub transport: Arc<FakeTransport>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_transport(FakeTransport::accepting())
    }

    pub fn with_transport(transport: FakeTransport) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("email_templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("plain.html"), PLAIN_TEMPLATE).unwrap();
        fs::write(templates.join("guide.html"), GUIDE_TEMPLATE).unwrap();

        let assets = dir.path().join("assets/email");
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("step1.png"), b"\x89PNG\r\n\x1a\n").unwrap();

        let transport = Arc::new(transport);
        let state = ServerState::new(
            test_config_in(dir.path()),
            Arc::new(trial_sheets()),
            transport.clone(),
        )
        .unwrap();

        Self {
            dir,
            state,
            transport,
        }
    }

    pub fn router(&self) -> Router {
        AppRouter::create(self.state.clone()).unwrap()
    }
}

pub async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
