//! Scripted stand-in for a real browser.
//!
//! A [`FakeSite`] maps page URLs to a [`Behavior`]. Clicking the page's
//! download button (or navigating to a direct file URL) starts a background
//! writer that produces files in the output directory the way Chrome does:
//! a `.crdownload` file that grows, then a rename to the final name, with
//! `name (1).ext` when the name is taken. All timing runs on tokio timers,
//! so paused-clock tests are deterministic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pagegrab_core::automation::{Automation, AutomationError, Document, Element, SessionFactory};
use pagegrab_core::link::Link;

/// What a page does when its download is triggered.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Writes `bytes` bytes as `name` through a growing `.crdownload` file.
    Download { name: String, bytes: usize },
    /// Starts `name.crdownload` and never finishes it.
    Hang { name: String },
    /// Page has no download control.
    NoButton,
    /// Page redirects to a login screen.
    LoginWall,
    /// Starts `name.crdownload`, never finishes it, and the session's pages
    /// turn into a login screen after the click.
    ExpireAfterClick { name: String },
    /// Navigation fails.
    Unreachable,
}

/// Shared script and call log for every session created by [`FakeFactory`].
#[derive(Debug)]
pub struct FakeSite {
    dir: PathBuf,
    step: Duration,
    behaviors: Mutex<HashMap<String, Behavior>>,
    log: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            step: Duration::from_millis(300),
            behaviors: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn on(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    /// Calls made by all sessions, e.g. `"session-1 click dl"`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.log()
            .iter()
            .filter(|entry| entry.split(' ').nth(1) == Some(verb))
            .count()
    }

    fn behavior(&self, url: &str) -> Option<Behavior> {
        self.behaviors.lock().unwrap().get(url).cloned()
    }

    fn record(&self, session: u32, entry: String) {
        self.log
            .lock()
            .unwrap()
            .push(format!("session-{session} {entry}"));
    }

    fn start_download(&self, behavior: Behavior) {
        let dir = self.dir.clone();
        let step = self.step;
        match behavior {
            Behavior::Download { name, bytes } => {
                tokio::spawn(async move {
                    let partial = dir.join(format!("{name}.crdownload"));
                    tokio::time::sleep(step).await;
                    std::fs::write(&partial, vec![1_u8; bytes / 2]).unwrap();
                    tokio::time::sleep(step).await;
                    std::fs::write(&partial, vec![1_u8; bytes]).unwrap();
                    tokio::time::sleep(step).await;
                    std::fs::rename(&partial, dir.join(free_name(&dir, &name))).unwrap();
                });
            }
            Behavior::Hang { name } | Behavior::ExpireAfterClick { name } => {
                tokio::spawn(async move {
                    tokio::time::sleep(step).await;
                    std::fs::write(dir.join(format!("{name}.crdownload")), b"partial").unwrap();
                });
            }
            Behavior::NoButton | Behavior::LoginWall | Behavior::Unreachable => {}
        }
    }
}

/// Chrome-style collision naming: `movie.rar` -> `movie (1).rar`.
fn free_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) => name.split_at(dot),
        None => (name, ""),
    };
    (1..)
        .map(|n| format!("{stem} ({n}){ext}"))
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap()
}

/// One fake browser session.
pub struct FakeBrowser {
    id: u32,
    site: Arc<FakeSite>,
    current: Option<String>,
    expired: bool,
}

#[async_trait]
impl Automation for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError> {
        self.site.record(self.id, format!("navigate {url}"));
        if matches!(self.site.behavior(url), Some(Behavior::Unreachable)) {
            return Err(AutomationError::navigation(url, "net::ERR_NAME_NOT_RESOLVED"));
        }
        self.current = Some(url.to_string());
        let direct = Link::parse(url).is_ok_and(|link| link.is_direct_file());
        if direct && let Some(behavior) = self.site.behavior(url) {
            self.site.start_download(behavior);
        }
        Ok(())
    }

    async fn find_candidates(
        &mut self,
        selectors: &[&str],
    ) -> Result<Vec<Element>, AutomationError> {
        let has_button = self
            .current
            .as_deref()
            .and_then(|url| self.site.behavior(url))
            .is_some_and(|b| {
                matches!(
                    b,
                    Behavior::Download { .. }
                        | Behavior::Hang { .. }
                        | Behavior::ExpireAfterClick { .. }
                )
            });
        if has_button && selectors.contains(&"button") {
            return Ok(vec![Element::new("dl", "button").with_text("Download")]);
        }
        Ok(Vec::new())
    }

    async fn click(&mut self, element: &Element) -> Result<(), AutomationError> {
        self.site
            .record(self.id, format!("click {}", element.handle.0));
        if let Some(behavior) = self.current.as_deref().and_then(|url| self.site.behavior(url)) {
            self.expired |= matches!(behavior, Behavior::ExpireAfterClick { .. });
            self.site.start_download(behavior);
        }
        Ok(())
    }

    async fn read_dom(&mut self) -> Result<Document, AutomationError> {
        let url = self.current.clone().unwrap_or_default();
        if self.expired || matches!(self.site.behavior(&url), Some(Behavior::LoginWall)) {
            return Ok(Document::new(
                "https://files.example.com/login?next=1",
                "<html><body>Please log in</body></html>",
            ));
        }
        Ok(Document::new(
            url,
            "<html><body><a href=\"/files/a.zip\">Get a.zip</a>\
             <a href=\"/files/b.pdf\">b.pdf</a></body></html>",
        ))
    }

    async fn dismiss_overlay(&mut self) -> Result<bool, AutomationError> {
        self.site.record(self.id, "dismiss_overlay".to_string());
        Ok(false)
    }

    async fn close(&mut self) -> Result<(), AutomationError> {
        self.site.record(self.id, "close".to_string());
        Ok(())
    }
}

/// Creates [`FakeBrowser`] sessions; can be told to fail every attempt.
pub struct FakeFactory {
    site: Arc<FakeSite>,
    created: Mutex<u32>,
    fail: bool,
}

impl FakeFactory {
    pub fn new(site: &Arc<FakeSite>) -> Arc<Self> {
        Arc::new(Self {
            site: Arc::clone(site),
            created: Mutex::new(0),
            fail: false,
        })
    }

    pub fn failing(site: &Arc<FakeSite>) -> Arc<Self> {
        Arc::new(Self {
            site: Arc::clone(site),
            created: Mutex::new(0),
            fail: true,
        })
    }

    pub fn created(&self) -> u32 {
        *self.created.lock().unwrap()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self) -> Result<Box<dyn Automation>, AutomationError> {
        if self.fail {
            return Err(AutomationError::unavailable("Chrome not found"));
        }
        let mut created = self.created.lock().unwrap();
        *created += 1;
        Ok(Box::new(FakeBrowser {
            id: *created,
            site: Arc::clone(&self.site),
            current: None,
            expired: false,
        }))
    }
}
