use tracing::{debug, info, instrument};

use crate::descriptor::{ControlDescriptor, WindowQuery};
use crate::errors::AutomationError;
use crate::platforms::WindowSystem;
use crate::utils::poll_until;
use crate::{ControlSnapshot, WindowHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Finds controls inside windows the driven application owns.
///
/// Every lookup re-reads the live tree; nothing is cached between calls
/// because the foreign process may recreate its controls at any time.
/// Absence is a normal answer: `locate` returns `None`, it never errors.
#[derive(Clone)]
pub struct Locator {
    system: Arc<dyn WindowSystem>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Locator {
    pub fn new(system: Arc<dyn WindowSystem>) -> Self {
        Self {
            system,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn system(&self) -> &Arc<dyn WindowSystem> {
        &self.system
    }

    /// Snapshots of all visible descendants of `root`, depth first.
    pub fn visible_descendants(&self, root: WindowHandle) -> Vec<ControlSnapshot> {
        self.system
            .descendants(root)
            .into_iter()
            .filter_map(|h| ControlSnapshot::capture(self.system.as_ref(), h))
            .filter(|s| s.visible)
            .collect()
    }

    /// One pass over the tree: the best candidate right now, after wrapper descent.
    pub fn find_once(
        &self,
        root: WindowHandle,
        descriptor: &ControlDescriptor,
    ) -> Option<ControlSnapshot> {
        let root_rect = self.system.rect(root)?;
        let candidates = self.visible_descendants(root);
        let best = descriptor.best(&candidates, Some(&root_rect))?.clone();
        if descriptor.is_wrapper(&best.class_name) {
            if let Some(inner) = self.most_specific_inside(&best, descriptor) {
                debug!(
                    "Descended from wrapper {} ({}) to {} ({})",
                    best.handle, best.class_name, inner.handle, inner.class_name
                );
                return Some(inner);
            }
        }
        Some(best)
    }

    /// Largest visible non-wrapper match beneath a wrapper container.
    fn most_specific_inside(
        &self,
        wrapper: &ControlSnapshot,
        descriptor: &ControlDescriptor,
    ) -> Option<ControlSnapshot> {
        self.visible_descendants(wrapper.handle)
            .into_iter()
            .filter(|s| {
                descriptor.classes.iter().any(|p| p.matches(&s.class_name))
                    && !descriptor.is_wrapper(&s.class_name)
            })
            .fold(None, |best: Option<ControlSnapshot>, s| match best {
                Some(b) if b.rect.area() >= s.rect.area() => Some(b),
                _ => Some(s),
            })
    }

    /// Polls until a candidate passes the descriptor or `timeout` elapses.
    #[instrument(level = "debug", skip(self, descriptor))]
    pub fn locate(
        &self,
        root: WindowHandle,
        descriptor: &ControlDescriptor,
        timeout: Duration,
    ) -> Option<WindowHandle> {
        self.locate_snapshot(root, descriptor, timeout)
            .map(|snapshot| snapshot.handle)
    }

    pub fn locate_snapshot(
        &self,
        root: WindowHandle,
        descriptor: &ControlDescriptor,
        timeout: Duration,
    ) -> Option<ControlSnapshot> {
        match poll_until(timeout, self.poll_interval, &self.cancel, || {
            self.find_once(root, descriptor)
        }) {
            Ok(found) => {
                if found.is_none() {
                    debug!("No control under {} matched within {:?}", root, timeout);
                }
                found
            }
            Err(e) => {
                debug!("Lookup under {} abandoned: {}", root, e);
                None
            }
        }
    }

    /// Concatenated static-text children of a window, one space apart.
    pub fn static_text(&self, window: WindowHandle) -> String {
        self.system
            .descendants(window)
            .into_iter()
            .filter(|h| self.system.class_name(*h).eq_ignore_ascii_case("Static"))
            .map(|h| self.system.window_text(h).trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn window_matches(&self, handle: WindowHandle, query: &WindowQuery) -> bool {
        if query.visible_only && !self.system.is_visible(handle) {
            return false;
        }
        if let Some(class_name) = &query.class_name {
            if !self.system.class_name(handle).eq_ignore_ascii_case(class_name) {
                return false;
            }
        }
        if let Some(title) = &query.title {
            if !title.matches(&self.system.window_text(handle)) {
                return false;
            }
        }
        if let Some(phrase) = &query.static_text {
            if !crate::utils::contains_any(&self.static_text(handle), &[phrase.as_str()]) {
                return false;
            }
        }
        true
    }

    /// Top-level windows matching `query`, in z-order.
    pub fn find_windows(&self, query: &WindowQuery) -> Vec<WindowHandle> {
        self.system
            .top_level_windows()
            .into_iter()
            .filter(|h| self.window_matches(*h, query))
            .collect()
    }

    pub fn find_window(&self, query: &WindowQuery) -> Option<WindowHandle> {
        self.find_windows(query).into_iter().next()
    }

    /// Polls for a top-level window. Cancellation surfaces as an error here
    /// because callers of window waits are protocol steps, not lookups.
    pub fn wait_window(
        &self,
        query: &WindowQuery,
        timeout: Duration,
    ) -> Result<Option<WindowHandle>, AutomationError> {
        poll_until(timeout, self.poll_interval, &self.cancel, || {
            self.find_window(query)
        })
    }

    /// First window matching any query, tried in order on every poll.
    pub fn wait_any_window(
        &self,
        queries: &[WindowQuery],
        timeout: Duration,
    ) -> Result<Option<WindowHandle>, AutomationError> {
        poll_until(timeout, self.poll_interval, &self.cancel, || {
            queries.iter().find_map(|q| self.find_window(q))
        })
    }

    /// Logs the largest descendants of `root` for diagnosing a screen that
    /// no longer matches; returns the logged lines.
    pub fn describe_tree(&self, root: WindowHandle, limit: usize) -> Vec<String> {
        let mut items: Vec<(usize, ControlSnapshot)> = Vec::new();
        let mut stack = vec![(root, 0usize)];
        let mut seen = std::collections::HashSet::new();
        while let Some((handle, depth)) = stack.pop() {
            if !seen.insert(handle) {
                continue;
            }
            if let Some(snapshot) = ControlSnapshot::capture(self.system.as_ref(), handle) {
                items.push((depth, snapshot));
            }
            for child in self.system.children(handle).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        items.sort_by_key(|(_, s)| std::cmp::Reverse(s.rect.area()));

        info!("---- descendants of {} (top {} by area) ----", root, limit);
        let lines: Vec<String> = items
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, (depth, s))| {
                let text: String = s.text.chars().take(60).collect();
                format!(
                    "{:02}) d={} hwnd={} cls={} size={}x{} txt='{}'",
                    i + 1,
                    depth,
                    s.handle,
                    s.class_name,
                    s.rect.width(),
                    s.rect.height(),
                    text
                )
            })
            .collect();
        for line in &lines {
            info!("{}", line);
        }
        info!("---- end of dump ----");
        lines
    }
}
