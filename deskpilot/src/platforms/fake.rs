//! In-memory window manager for exercising the core without a live process.
//!
//! A `FakeDesktop` holds a tree of synthetic windows with the class names,
//! captions and geometry a real screen would report, and lets a test attach
//! reactions to clicks, menu commands, key presses and combo selections so
//! the "driven application" can open dialogs or reset fields on cue.

use super::{Key, KeyStroke, Modifier, WindowSystem};
use crate::{AutomationError, Rect, WindowHandle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const LIST_ITEM_HEIGHT: i32 = 16;

pub type Reaction = Box<dyn FnMut(&mut FakeState) + Send>;

/// What a reaction listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Button activation, posted mouse click, or a screen click landing on it.
    Click(WindowHandle),
    Close(WindowHandle),
    /// Menu path joined with `->`, e.g. `Archivo->Capturar Servicios`.
    Menu(String),
    /// A combo box changed its selection.
    Selection(WindowHandle),
    Key(Key),
    Launch,
}

/// How an input control treats the two text channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextBehavior {
    #[default]
    Normal,
    /// `WM_SETTEXT` is swallowed; typed keys still land.
    IgnoresSetText,
    /// Nothing changes the text.
    ReadOnly,
}

/// Everything observable that happened on the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Click(WindowHandle),
    MouseClick(WindowHandle, i32, i32),
    ScreenClick(i32, i32),
    Close(WindowHandle),
    PostKey(WindowHandle, Key),
    SetText(WindowHandle, String),
    Notify(WindowHandle, u16),
    Keys(Vec<KeyStroke>),
    Menu(WindowHandle, String),
    Foreground(WindowHandle),
    Launch(PathBuf, bool),
    Kill(String),
}

#[derive(Debug, Clone, Default)]
pub struct FakeWindow {
    pub parent: Option<WindowHandle>,
    pub children: Vec<WindowHandle>,
    pub class_name: String,
    pub text: String,
    pub rect: Rect,
    pub visible: bool,
    pub enabled: bool,
    pub alive: bool,
    pub control_id: i32,
    pub text_behavior: TextBehavior,
    /// Item count when the window is a combo box.
    pub combo_items: Option<usize>,
    pub selection: Option<i32>,
    pub dropdown: Option<WindowHandle>,
    /// Item count when the window is a list box.
    pub list_items: Option<usize>,
    pub owner_combo: Option<WindowHandle>,
    pub cells: Option<Vec<Vec<String>>>,
    /// What Ctrl+C puts on the clipboard while this window has focus.
    pub copy_payload: Option<String>,
}

struct Registered {
    trigger: Trigger,
    once: bool,
    spent: bool,
    reaction: Reaction,
}

pub struct FakeState {
    windows: BTreeMap<WindowHandle, FakeWindow>,
    top_level: Vec<WindowHandle>,
    next_handle: isize,
    focus: Option<WindowHandle>,
    foreground: Option<WindowHandle>,
    clipboard: String,
    select_all_pending: bool,
    reactions: Vec<Registered>,
    events: Vec<FakeEvent>,
    /// Whether combos really pop their list when asked to.
    pub dropdowns_open: bool,
    pub elevated: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            windows: BTreeMap::new(),
            top_level: Vec::new(),
            next_handle: 0x100,
            focus: None,
            foreground: None,
            clipboard: String::new(),
            select_all_pending: false,
            reactions: Vec::new(),
            events: Vec::new(),
            dropdowns_open: true,
            elevated: true,
        }
    }
}

impl FakeState {
    pub fn add_window(
        &mut self,
        parent: Option<WindowHandle>,
        class_name: &str,
        text: &str,
        rect: Rect,
    ) -> WindowHandle {
        let handle = WindowHandle(self.next_handle);
        self.next_handle += 2;
        let window = FakeWindow {
            parent,
            class_name: class_name.to_string(),
            text: text.to_string(),
            rect,
            visible: true,
            enabled: true,
            alive: true,
            control_id: (handle.0 & 0xFFFF) as i32,
            ..Default::default()
        };
        self.windows.insert(handle, window);
        match parent {
            Some(p) => {
                if let Some(parent) = self.windows.get_mut(&p) {
                    parent.children.push(handle);
                }
            }
            None => self.top_level.push(handle),
        }
        handle
    }

    /// Adds a message-box style dialog (`#32770`) with static lines and buttons.
    pub fn add_dialog(&mut self, title: &str, lines: &[&str], buttons: &[&str]) -> WindowHandle {
        let dialog = self.add_window(None, "#32770", title, Rect::sized(300, 250, 360, 160));
        for (i, line) in lines.iter().enumerate() {
            self.add_window(
                Some(dialog),
                "Static",
                line,
                Rect::sized(320, 270 + i as i32 * 20, 300, 18),
            );
        }
        for (i, caption) in buttons.iter().enumerate() {
            self.add_window(
                Some(dialog),
                "Button",
                caption,
                Rect::sized(330 + i as i32 * 90, 370, 80, 26),
            );
        }
        dialog
    }

    pub fn window(&self, handle: WindowHandle) -> Option<&FakeWindow> {
        self.windows.get(&handle)
    }

    pub fn window_mut(&mut self, handle: WindowHandle) -> Option<&mut FakeWindow> {
        self.windows.get_mut(&handle)
    }

    pub fn text_of(&self, handle: WindowHandle) -> String {
        self.windows
            .get(&handle)
            .map(|w| w.text.clone())
            .unwrap_or_default()
    }

    pub fn set_text(&mut self, handle: WindowHandle, value: &str) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.text = value.to_string();
        }
    }

    /// Destroys a window and its whole subtree.
    pub fn destroy(&mut self, handle: WindowHandle) {
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if let Some(window) = self.windows.get_mut(&h) {
                window.alive = false;
                window.visible = false;
                stack.extend(window.children.iter().copied());
                if let Some(dropdown) = window.dropdown.take() {
                    stack.push(dropdown);
                }
            }
        }
        if self.focus == Some(handle) {
            self.focus = None;
        }
    }

    pub fn is_alive(&self, handle: WindowHandle) -> bool {
        self.windows.get(&handle).is_some_and(|w| w.alive)
    }

    pub fn focus(&self) -> Option<WindowHandle> {
        self.focus
    }

    pub fn events(&self) -> &[FakeEvent] {
        &self.events
    }

    /// Top-level alive windows of a class, newest first.
    pub fn live_top_level(&self, class_name: &str) -> Vec<WindowHandle> {
        self.top_level
            .iter()
            .rev()
            .copied()
            .filter(|h| {
                self.windows
                    .get(h)
                    .is_some_and(|w| w.alive && w.class_name == class_name)
            })
            .collect()
    }

    fn alive(&self, handle: WindowHandle) -> Option<&FakeWindow> {
        self.windows.get(&handle).filter(|w| w.alive)
    }

    fn record(&mut self, event: FakeEvent) {
        self.events.push(event);
    }

    /// Runs matching reactions; returns how many fired.
    fn fire(&mut self, trigger: &Trigger) -> usize {
        let mut fired = 0;
        let mut index = 0;
        while index < self.reactions.len() {
            let matches = {
                let entry = &self.reactions[index];
                !entry.spent && entry.trigger == *trigger
            };
            if matches {
                let mut reaction: Reaction = std::mem::replace(
                    &mut self.reactions[index].reaction,
                    Box::new(|_: &mut FakeState| {}),
                );
                reaction(self);
                let entry = &mut self.reactions[index];
                entry.reaction = reaction;
                if entry.once {
                    entry.spent = true;
                }
                fired += 1;
            }
            index += 1;
        }
        fired
    }

    fn top_ancestor(&self, handle: WindowHandle) -> WindowHandle {
        let mut current = handle;
        while let Some(parent) = self.windows.get(&current).and_then(|w| w.parent) {
            current = parent;
        }
        current
    }

    fn open_dropdown(&mut self, combo: WindowHandle) {
        let Some(window) = self.alive(combo) else {
            return;
        };
        if window.dropdown.is_some_and(|d| self.is_alive(d)) {
            return;
        }
        let Some(items) = window.combo_items else {
            return;
        };
        let rect = window.rect;
        let list = self.add_window(
            None,
            "ComboLBox",
            "",
            Rect::new(
                rect.left,
                rect.bottom,
                rect.right,
                rect.bottom + LIST_ITEM_HEIGHT * items as i32,
            ),
        );
        if let Some(list_window) = self.windows.get_mut(&list) {
            list_window.list_items = Some(items);
            list_window.owner_combo = Some(combo);
        }
        if let Some(combo_window) = self.windows.get_mut(&combo) {
            combo_window.dropdown = Some(list);
        }
    }

    fn close_dropdowns(&mut self) {
        let open: Vec<WindowHandle> = self.live_top_level("ComboLBox");
        for list in open {
            self.destroy(list);
        }
        for window in self.windows.values_mut() {
            window.dropdown = None;
        }
    }

    fn select_from_list(&mut self, list: WindowHandle, y: i32) {
        let Some(window) = self.alive(list) else {
            return;
        };
        let (Some(count), Some(owner)) = (window.list_items, window.owner_combo) else {
            return;
        };
        if count == 0 {
            return;
        }
        let item_height = (window.rect.height() / count as i32).max(1);
        let index = (y - window.rect.top) / item_height;
        if index < 0 || index as usize >= count {
            return;
        }
        let changed = self
            .windows
            .get(&owner)
            .is_some_and(|w| w.selection != Some(index));
        if let Some(combo) = self.windows.get_mut(&owner) {
            combo.selection = Some(index);
        }
        if changed {
            self.fire(&Trigger::Selection(owner));
        }
    }

    fn hit_test(&self, x: i32, y: i32) -> Option<WindowHandle> {
        for top in self.top_level.iter().rev() {
            let Some(window) = self.alive(*top) else {
                continue;
            };
            if !window.visible || !window.rect.contains(x, y) {
                continue;
            }
            let mut current = *top;
            'descend: loop {
                let children = self.windows.get(&current).map(|w| w.children.clone());
                for child in children.unwrap_or_default().iter().rev() {
                    if let Some(w) = self.alive(*child) {
                        if w.visible && w.rect.contains(x, y) {
                            current = *child;
                            continue 'descend;
                        }
                    }
                }
                return Some(current);
            }
        }
        None
    }

    fn type_text(&mut self, value: &str) {
        let Some(focus) = self.focus else {
            return;
        };
        let replace = std::mem::take(&mut self.select_all_pending);
        if let Some(window) = self.windows.get_mut(&focus).filter(|w| w.alive) {
            if window.text_behavior == TextBehavior::ReadOnly {
                return;
            }
            if replace {
                window.text.clear();
            }
            window.text.push_str(value);
        }
    }

    fn press(&mut self, key: Key) {
        match key {
            Key::Backspace => {
                let clear = std::mem::take(&mut self.select_all_pending);
                if let Some(window) = self
                    .focus
                    .and_then(|f| self.windows.get_mut(&f))
                    .filter(|w| w.alive && w.text_behavior != TextBehavior::ReadOnly)
                {
                    if clear {
                        window.text.clear();
                    } else {
                        window.text.pop();
                    }
                }
            }
            Key::Escape => self.close_dropdowns(),
            _ => {}
        }
        self.fire(&Trigger::Key(key));
    }

    fn chord(&mut self, modifier: Modifier, key: Key) {
        match (modifier, key) {
            (Modifier::Ctrl, Key::Char('a')) => self.select_all_pending = true,
            (Modifier::Ctrl, Key::Char('c')) => {
                if let Some(payload) = self
                    .focus
                    .and_then(|f| self.alive(f))
                    .and_then(|w| w.copy_payload.clone())
                {
                    self.clipboard = payload;
                }
            }
            (Modifier::Alt, Key::F4) => {
                if let Some(foreground) = self.foreground {
                    self.fire(&Trigger::Close(foreground));
                    self.destroy(foreground);
                }
            }
            (Modifier::Shift, Key::End) => self.select_all_pending = true,
            _ => {
                self.fire(&Trigger::Key(key));
            }
        }
    }
}

/// Scriptable stand-in for the OS window manager.
#[derive(Default)]
pub struct FakeDesktop {
    state: Mutex<FakeState>,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_window(
        &self,
        parent: Option<WindowHandle>,
        class_name: &str,
        text: &str,
        rect: Rect,
    ) -> WindowHandle {
        self.state().add_window(parent, class_name, text, rect)
    }

    pub fn add_dialog(&self, title: &str, lines: &[&str], buttons: &[&str]) -> WindowHandle {
        self.state().add_dialog(title, lines, buttons)
    }

    /// Applies an edit to one window's attributes.
    pub fn configure(&self, handle: WindowHandle, edit: impl FnOnce(&mut FakeWindow)) {
        if let Some(window) = self.state().window_mut(handle) {
            edit(window);
        }
    }

    /// Registers a reaction that fires every time `trigger` happens.
    pub fn on(&self, trigger: Trigger, reaction: impl FnMut(&mut FakeState) + Send + 'static) {
        self.state().reactions.push(Registered {
            trigger,
            once: false,
            spent: false,
            reaction: Box::new(reaction),
        });
    }

    /// Registers a reaction that fires the first time `trigger` happens.
    pub fn once(&self, trigger: Trigger, reaction: impl FnMut(&mut FakeState) + Send + 'static) {
        self.state().reactions.push(Registered {
            trigger,
            once: true,
            spent: false,
            reaction: Box::new(reaction),
        });
    }

    pub fn text_of(&self, handle: WindowHandle) -> String {
        self.state().text_of(handle)
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.state().events().to_vec()
    }

    pub fn is_alive(&self, handle: WindowHandle) -> bool {
        self.state().is_alive(handle)
    }
}

impl WindowSystem for FakeDesktop {
    fn top_level_windows(&self) -> Vec<WindowHandle> {
        let state = self.state();
        state
            .top_level
            .iter()
            .rev()
            .copied()
            .filter(|h| state.alive(*h).is_some())
            .collect()
    }

    fn children(&self, parent: WindowHandle) -> Vec<WindowHandle> {
        let state = self.state();
        state
            .alive(parent)
            .map(|w| {
                w.children
                    .iter()
                    .copied()
                    .filter(|c| state.alive(*c).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn class_name(&self, handle: WindowHandle) -> String {
        self.state()
            .alive(handle)
            .map(|w| w.class_name.clone())
            .unwrap_or_default()
    }

    fn window_text(&self, handle: WindowHandle) -> String {
        self.state()
            .alive(handle)
            .map(|w| w.text.clone())
            .unwrap_or_default()
    }

    fn control_text(&self, handle: WindowHandle) -> Option<String> {
        self.state().alive(handle).map(|w| w.text.clone())
    }

    fn rect(&self, handle: WindowHandle) -> Option<Rect> {
        self.state().alive(handle).map(|w| w.rect)
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        self.state().alive(handle).is_some_and(|w| w.visible)
    }

    fn is_enabled(&self, handle: WindowHandle) -> bool {
        self.state().alive(handle).is_some_and(|w| w.enabled)
    }

    fn is_alive(&self, handle: WindowHandle) -> bool {
        self.state().is_alive(handle)
    }

    fn parent(&self, handle: WindowHandle) -> Option<WindowHandle> {
        self.state().alive(handle).and_then(|w| w.parent)
    }

    fn control_id(&self, handle: WindowHandle) -> i32 {
        self.state()
            .alive(handle)
            .map(|w| w.control_id)
            .unwrap_or_default()
    }

    fn post_click(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        let mut state = self.state();
        if state.alive(handle).is_none() {
            return Err(AutomationError::PlatformError(format!(
                "window {handle} is gone"
            )));
        }
        state.record(FakeEvent::Click(handle));
        state.fire(&Trigger::Click(handle));
        let dialog = state.window(handle).and_then(|w| w.parent).filter(|p| {
            state
                .alive(*p)
                .is_some_and(|w| w.class_name == "#32770" && w.parent.is_none())
        });
        let is_button = state
            .window(handle)
            .is_some_and(|w| w.class_name == "Button");
        if let (Some(dialog), true) = (dialog, is_button) {
            state.destroy(dialog);
        }
        Ok(())
    }

    fn post_mouse_click(
        &self,
        handle: WindowHandle,
        x: i32,
        y: i32,
    ) -> Result<(), AutomationError> {
        let mut state = self.state();
        let Some(window) = state.alive(handle) else {
            return Err(AutomationError::PlatformError(format!(
                "window {handle} is gone"
            )));
        };
        let screen_y = window.rect.top + y;
        state.record(FakeEvent::MouseClick(handle, x, y));
        state.select_from_list(handle, screen_y);
        state.fire(&Trigger::Click(handle));
        Ok(())
    }

    fn post_close(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        let mut state = self.state();
        if state.alive(handle).is_none() {
            return Err(AutomationError::PlatformError(format!(
                "window {handle} is gone"
            )));
        }
        state.record(FakeEvent::Close(handle));
        state.fire(&Trigger::Close(handle));
        state.destroy(handle);
        Ok(())
    }

    fn post_key(&self, handle: WindowHandle, key: Key) -> Result<(), AutomationError> {
        let mut state = self.state();
        if state.alive(handle).is_none() {
            return Err(AutomationError::PlatformError(format!(
                "window {handle} is gone"
            )));
        }
        state.record(FakeEvent::PostKey(handle, key));
        state.fire(&Trigger::Key(key));
        let is_dialog = state
            .alive(handle)
            .is_some_and(|w| w.class_name == "#32770");
        if key == Key::Enter && is_dialog {
            state.destroy(handle);
        }
        Ok(())
    }

    fn set_text(&self, handle: WindowHandle, value: &str) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.record(FakeEvent::SetText(handle, value.to_string()));
        match state.window_mut(handle).filter(|w| w.alive) {
            Some(window) => {
                if window.text_behavior == TextBehavior::Normal {
                    window.text = value.to_string();
                }
                Ok(())
            }
            None => Err(AutomationError::PlatformError(format!(
                "window {handle} is gone"
            ))),
        }
    }

    fn notify_parent(&self, handle: WindowHandle, code: u16) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.record(FakeEvent::Notify(handle, code));
        Ok(())
    }

    fn show_dropdown(&self, combo: WindowHandle, show: bool) -> Result<(), AutomationError> {
        let mut state = self.state();
        if show {
            if state.dropdowns_open {
                state.open_dropdown(combo);
            }
        } else {
            state.close_dropdowns();
        }
        Ok(())
    }

    fn combo_selection(&self, combo: WindowHandle) -> Option<i32> {
        self.state().alive(combo).and_then(|w| w.selection)
    }

    fn list_item_count(&self, list: WindowHandle) -> Option<usize> {
        self.state().alive(list).and_then(|w| w.list_items)
    }

    fn list_view_cells(&self, list: WindowHandle) -> Option<Vec<Vec<String>>> {
        self.state().alive(list).and_then(|w| w.cells.clone())
    }

    fn set_foreground(&self, handle: WindowHandle) -> bool {
        let mut state = self.state();
        let top = state.top_ancestor(handle);
        if state.alive(top).is_none() {
            return false;
        }
        state.foreground = Some(top);
        state.record(FakeEvent::Foreground(top));
        true
    }

    fn set_focus(&self, handle: WindowHandle) -> bool {
        let mut state = self.state();
        if state.alive(handle).is_none() {
            return false;
        }
        state.focus = Some(handle);
        true
    }

    fn send_keys(&self, keys: &[KeyStroke]) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.record(FakeEvent::Keys(keys.to_vec()));
        for stroke in keys {
            match stroke {
                KeyStroke::Text(value) => state.type_text(value),
                KeyStroke::Press(key) => state.press(*key),
                KeyStroke::Chord(modifier, key) => state.chord(*modifier, *key),
            }
        }
        Ok(())
    }

    fn click_at(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.record(FakeEvent::ScreenClick(x, y));
        let Some(hit) = state.hit_test(x, y) else {
            return Ok(());
        };
        let is_list = state.window(hit).is_some_and(|w| w.owner_combo.is_some());
        if is_list {
            state.select_from_list(hit, y);
        } else {
            state.focus = Some(hit);
        }
        state.fire(&Trigger::Click(hit));
        Ok(())
    }

    fn clipboard_text(&self) -> Option<String> {
        Some(self.state().clipboard.clone())
    }

    fn set_clipboard_text(&self, value: &str) -> Result<(), AutomationError> {
        self.state().clipboard = value.to_string();
        Ok(())
    }

    fn menu_command(&self, window: WindowHandle, path: &[&str]) -> Result<(), AutomationError> {
        let mut state = self.state();
        let joined = path.join("->");
        state.record(FakeEvent::Menu(window, joined.clone()));
        if state.fire(&Trigger::Menu(joined.clone())) == 0 {
            return Err(AutomationError::ElementNotFound(format!(
                "menu item '{joined}'"
            )));
        }
        Ok(())
    }

    fn launch(&self, exe_path: &Path, elevated: bool) -> Result<Option<u32>, AutomationError> {
        let mut state = self.state();
        state.record(FakeEvent::Launch(exe_path.to_path_buf(), elevated));
        state.fire(&Trigger::Launch);
        Ok(Some(4242))
    }

    fn kill_processes(&self, image_name: &str) -> usize {
        self.state()
            .record(FakeEvent::Kill(image_name.to_string()));
        0
    }

    fn is_elevated(&self) -> bool {
        self.state().elevated
    }
}
