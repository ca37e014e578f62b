#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Notify;

use docker_log_harvester::accumulator::WindowAccumulator;
use docker_log_harvester::config::CutoffPolicy;
use docker_log_harvester::harvest::names::{NameLookupError, NameResolver};
use docker_log_harvester::harvest::SourceLogReader;
use docker_log_harvester::pipeline::Pipeline;
use docker_log_harvester::remote::{ListPage, ObjectStore, RemoteError, RemoteObject};
use docker_log_harvester::retention::RetentionSweeper;
use docker_log_harvester::store::Store;
use docker_log_harvester::window::{Clock, TimeWindower};

pub const IDENTITY: &str = "vps-test-node";

pub fn instant(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid instant")
        .with_timezone(&Utc)
}

/// Clock the test moves by hand.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().expect("clock lock") = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("clock lock")
    }
}

/// Resolves ids from a fixed table; unknown ids fail the lookup. With a
/// hold set, every lookup first waits for one `notify_one` on it.
#[derive(Debug, Clone, Default)]
pub struct StaticNames {
    pub names: HashMap<String, String>,
    pub hold: Option<Arc<Notify>>,
}

impl StaticNames {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            names: pairs
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            hold: None,
        }
    }

    pub fn held(mut self, hold: Arc<Notify>) -> Self {
        self.hold = Some(hold);
        self
    }
}

impl NameResolver for StaticNames {
    async fn lookup(&self, container_id: &str) -> Result<String, NameLookupError> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        self.names
            .get(container_id)
            .cloned()
            .ok_or(NameLookupError::Status(1))
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: BTreeMap<String, StoredObject>,
    failing_puts: Vec<String>,
    failing_deletes: Vec<String>,
    fail_listing: bool,
    page_size: usize,
    calls: usize,
}

/// In-memory bucket with injectable failures. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> T {
        f(&mut self.inner.lock().expect("store lock"))
    }

    pub fn insert(&self, key: &str, size: usize, last_modified: DateTime<Utc>) {
        self.with_inner(|inner| {
            inner.objects.insert(
                key.to_string(),
                StoredObject {
                    body: vec![0; size],
                    last_modified,
                },
            );
        });
    }

    /// Puts whose key contains `fragment` fail with a 500.
    pub fn fail_puts_matching(&self, fragment: &str) {
        self.with_inner(|inner| inner.failing_puts.push(fragment.to_string()));
    }

    pub fn fail_deletes_matching(&self, fragment: &str) {
        self.with_inner(|inner| inner.failing_deletes.push(fragment.to_string()));
    }

    pub fn clear_failures(&self) {
        self.with_inner(|inner| {
            inner.failing_puts.clear();
            inner.failing_deletes.clear();
            inner.fail_listing = false;
        });
    }

    pub fn fail_listing(&self) {
        self.with_inner(|inner| inner.fail_listing = true);
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.with_inner(|inner| inner.page_size = page_size);
    }

    pub fn keys(&self) -> Vec<String> {
        self.with_inner(|inner| inner.objects.keys().cloned().collect())
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.with_inner(|inner| inner.objects.get(key).cloned())
    }

    pub fn calls(&self) -> usize {
        self.with_inner(|inner| inner.calls)
    }
}

fn injected() -> RemoteError {
    RemoteError::Status {
        status: 500,
        body: "injected failure".to_string(),
    }
}

impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), RemoteError> {
        self.with_inner(|inner| {
            inner.calls += 1;
            if inner.failing_puts.iter().any(|f| key.contains(f.as_str())) {
                return Err(injected());
            }
            inner.objects.insert(
                key.to_string(),
                StoredObject {
                    body,
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, RemoteError> {
        self.with_inner(|inner| {
            inner.calls += 1;
            if inner.fail_listing {
                return Err(RemoteError::Timeout);
            }
            let limit = if inner.page_size == 0 {
                usize::MAX
            } else {
                inner.page_size
            };
            let mut matching = inner
                .objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .filter(|(key, _)| {
                    continuation
                        .as_deref()
                        .map_or(true, |after| key.as_str() > after)
                });

            let objects: Vec<RemoteObject> = matching
                .by_ref()
                .take(limit)
                .map(|(key, obj)| RemoteObject {
                    key: key.clone(),
                    size: obj.body.len() as u64,
                    last_modified: obj.last_modified,
                })
                .collect();
            let next_token = match (matching.next(), objects.last()) {
                (Some(_), Some(last)) => Some(last.key.clone()),
                _ => None,
            };
            Ok(ListPage {
                objects,
                next_token,
            })
        })
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.with_inner(|inner| {
            inner.calls += 1;
            if inner.failing_deletes.iter().any(|f| key.contains(f.as_str())) {
                return Err(injected());
            }
            inner.objects.remove(key);
            Ok(())
        })
    }
}

/// One Docker json-file driver line.
pub fn docker_line(stream: &str, time: DateTime<Utc>, msg: &str) -> String {
    serde_json::json!({
        "log": format!("{msg}\n"),
        "stream": stream,
        "time": time.to_rfc3339_opts(SecondsFormat::Nanos, true),
    })
    .to_string()
}

/// Appends raw lines to `<containers>/<id>/<id>-json.log`.
pub fn append_source(containers_dir: &Path, container_id: &str, lines: &[String]) -> PathBuf {
    let dir = containers_dir.join(container_id);
    fs::create_dir_all(&dir).expect("create container dir");
    let path = dir.join(format!("{container_id}-json.log"));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .expect("open source log");
    for line in lines {
        writeln!(file, "{line}").expect("write source line");
    }
    path
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read artifact")
        .lines()
        .map(str::to_string)
        .collect()
}

/// Writes `content` and backdates its modification time by `age`.
pub fn write_aged(path: &Path, content: &[u8], age: StdDuration) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write aged file");
    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("reopen aged file");
    file.set_modified(SystemTime::now() - age)
        .expect("set mtime");
}

pub fn days(n: u64) -> StdDuration {
    StdDuration::from_secs(n * 86_400)
}

/// A full pipeline over temp directories, a manual clock and an in-memory
/// bucket.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub remote: MemoryStore,
    pub pipeline: Pipeline<StaticNames, MemoryStore>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>, names: StaticNames) -> Self {
        Self::with_cutoff(
            now,
            names,
            CutoffPolicy::Sliding {
                window: StdDuration::from_secs(300),
            },
        )
    }

    pub fn with_cutoff(now: DateTime<Utc>, names: StaticNames, cutoff: CutoffPolicy) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let containers_dir = dir.path().join("containers");
        let harvest_dir = dir.path().join("harvest");
        fs::create_dir_all(&harvest_dir).expect("create harvest dir");

        let store = Arc::new(Store::open(&dir.path().join("cursors.sled")).expect("open store"));
        let clock = Arc::new(ManualClock::new(now));
        let remote = MemoryStore::default();

        let pipeline = Pipeline {
            windower: TimeWindower::new(clock.clone(), chrono_tz::Europe::Paris, 10),
            reader: SourceLogReader::new(&containers_dir, &harvest_dir, names),
            accumulator: WindowAccumulator::new(&harvest_dir),
            store,
            remote: remote.clone(),
            sweeper: RetentionSweeper::from_days(7, 45),
            cutoff,
            identity: IDENTITY.to_string(),
            pass_lock: Default::default(),
        };

        Self {
            dir,
            clock,
            remote,
            pipeline,
        }
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.dir.path().join("containers")
    }

    pub fn harvest_dir(&self) -> PathBuf {
        self.dir.path().join("harvest")
    }

    /// `<harvest>/<name>/<date>/<HHh00min>_<kind>.log`
    pub fn artifact(&self, container: &str, date: &str, hour: u32, kind: &str) -> PathBuf {
        self.harvest_dir()
            .join(container)
            .join(date)
            .join(format!("{hour:02}h00min_{kind}.log"))
    }
}
