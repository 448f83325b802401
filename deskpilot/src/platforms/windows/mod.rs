//! Win32 implementation of [`WindowSystem`] over raw window handles.

mod input;
mod listview;
mod types;

use self::types::{from_hwnd, to_hwnd, to_wide, wide_to_string, HandleGuard};
use super::{Key, KeyStroke, WindowSystem};
use crate::utils::normalize_caption;
use crate::{AutomationError, Rect, WindowHandle};
use std::ffi::c_void;
use std::path::Path;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{BOOL, FALSE, HANDLE, HWND, LPARAM, RECT, TRUE, WPARAM};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::System::DataExchange::{
    CloseClipboard, EmptyClipboard, GetClipboardData, OpenClipboard, SetClipboardData,
};
use windows::Win32::System::Memory::{GlobalAlloc, GlobalLock, GlobalUnlock, GMEM_MOVEABLE};
use windows::Win32::System::Threading::{
    AttachThreadInput, GetCurrentProcess, GetCurrentThreadId, OpenProcessToken,
};
use windows::Win32::UI::Shell::ShellExecuteW;
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, EnumChildWindows, EnumWindows, GetAncestor, GetClassNameW, GetDlgCtrlID,
    GetMenu, GetMenuItemCount, GetMenuItemID, GetMenuStringW, GetSubMenu, GetWindowRect,
    GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow,
    IsWindowEnabled, IsWindowVisible, PostMessageW, SendMessageTimeoutW,
    SetFocus, SetForegroundWindow, ShowWindow, GA_PARENT, GA_ROOT, HMENU, MF_BYPOSITION,
    SMTO_ABORTIFHUNG, SW_RESTORE, SW_SHOWNORMAL,
};

mod msg {
    pub const WM_SETTEXT: u32 = 0x000C;
    pub const WM_GETTEXT: u32 = 0x000D;
    pub const WM_GETTEXTLENGTH: u32 = 0x000E;
    pub const WM_CLOSE: u32 = 0x0010;
    pub const WM_KEYDOWN: u32 = 0x0100;
    pub const WM_KEYUP: u32 = 0x0101;
    pub const WM_COMMAND: u32 = 0x0111;
    pub const WM_LBUTTONDOWN: u32 = 0x0201;
    pub const WM_LBUTTONUP: u32 = 0x0202;
    pub const MK_LBUTTON: usize = 0x0001;
    pub const BM_CLICK: u32 = 0x00F5;
    pub const CB_GETCURSEL: u32 = 0x0147;
    pub const CB_SHOWDROPDOWN: u32 = 0x014F;
    pub const LB_GETCOUNT: u32 = 0x018B;
    pub const CB_ERR: isize = -1;
}

const CF_UNICODETEXT: u32 = 13;
const MESSAGE_TIMEOUT_MS: u32 = 2000;
const CLIPBOARD_ATTEMPTS: usize = 10;

fn make_lparam(x: i32, y: i32) -> LPARAM {
    LPARAM((((y as u32 & 0xFFFF) << 16) | (x as u32 & 0xFFFF)) as isize)
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let out = &mut *(lparam.0 as *mut Vec<HWND>);
    out.push(hwnd);
    TRUE
}

/// Window manager access for the current desktop session
pub struct Win32System;

impl Win32System {
    pub fn new() -> Result<Self, AutomationError> {
        info!("Using Win32 window system backend");
        Ok(Self)
    }

    fn post(&self, handle: WindowHandle, message: u32, wparam: usize, lparam: LPARAM) -> Result<(), AutomationError> {
        unsafe { PostMessageW(to_hwnd(handle), message, WPARAM(wparam), lparam) }.map_err(|e| {
            AutomationError::PlatformError(format!(
                "PostMessage 0x{message:04x} to {handle} failed: {e}"
            ))
        })
    }

    fn send_timeout(&self, handle: WindowHandle, message: u32, wparam: usize, lparam: LPARAM) -> Option<usize> {
        let mut result = 0usize;
        let ok = unsafe {
            SendMessageTimeoutW(
                to_hwnd(handle),
                message,
                WPARAM(wparam),
                lparam,
                SMTO_ABORTIFHUNG,
                MESSAGE_TIMEOUT_MS,
                Some(&mut result as *mut usize),
            )
        };
        (ok.0 != 0).then_some(result)
    }

    fn with_clipboard<T>(&self, body: impl FnOnce() -> T) -> Option<T> {
        for _ in 0..CLIPBOARD_ATTEMPTS {
            if unsafe { OpenClipboard(HWND::default()) }.is_ok() {
                let value = body();
                unsafe {
                    let _ = CloseClipboard();
                }
                return Some(value);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        warn!("Clipboard stayed busy");
        None
    }

    fn find_menu_item(menu: HMENU, caption: &str) -> Option<i32> {
        let wanted = normalize_caption(caption);
        let count = unsafe { GetMenuItemCount(menu) };
        (0..count).find(|&position| {
            let mut buffer = [0u16; 256];
            let len = unsafe {
                GetMenuStringW(menu, position as u32, Some(&mut buffer[..]), MF_BYPOSITION)
            };
            normalize_caption(&wide_to_string(&buffer, len)) == wanted
        })
    }
}

impl WindowSystem for Win32System {
    fn top_level_windows(&self) -> Vec<WindowHandle> {
        let mut found: Vec<HWND> = Vec::new();
        unsafe {
            let _ = EnumWindows(
                Some(collect_window),
                LPARAM(&mut found as *mut Vec<HWND> as isize),
            );
        }
        found.into_iter().map(from_hwnd).collect()
    }

    fn children(&self, parent: WindowHandle) -> Vec<WindowHandle> {
        let parent_hwnd = to_hwnd(parent);
        let mut found: Vec<HWND> = Vec::new();
        unsafe {
            let _ = EnumChildWindows(
                parent_hwnd,
                Some(collect_window),
                LPARAM(&mut found as *mut Vec<HWND> as isize),
            );
        }
        // EnumChildWindows walks the whole subtree; keep direct children.
        found
            .into_iter()
            .filter(|child| unsafe { GetAncestor(*child, GA_PARENT) } == parent_hwnd)
            .map(from_hwnd)
            .collect()
    }

    fn class_name(&self, handle: WindowHandle) -> String {
        let mut buffer = [0u16; 256];
        let len = unsafe { GetClassNameW(to_hwnd(handle), &mut buffer) };
        wide_to_string(&buffer, len)
    }

    fn window_text(&self, handle: WindowHandle) -> String {
        let hwnd = to_hwnd(handle);
        let len = unsafe { GetWindowTextLengthW(hwnd) };
        if len <= 0 {
            return String::new();
        }
        let mut buffer = vec![0u16; len as usize + 1];
        let copied = unsafe { GetWindowTextW(hwnd, &mut buffer) };
        wide_to_string(&buffer, copied)
    }

    fn control_text(&self, handle: WindowHandle) -> Option<String> {
        let len = self.send_timeout(handle, msg::WM_GETTEXTLENGTH, 0, LPARAM(0))?;
        let mut buffer = vec![0u16; len + 1];
        let copied = self.send_timeout(
            handle,
            msg::WM_GETTEXT,
            buffer.len(),
            LPARAM(buffer.as_mut_ptr() as isize),
        )?;
        Some(wide_to_string(&buffer, copied as i32))
    }

    fn rect(&self, handle: WindowHandle) -> Option<Rect> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(to_hwnd(handle), &mut rect) }.ok()?;
        Some(Rect::new(rect.left, rect.top, rect.right, rect.bottom))
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindowVisible(to_hwnd(handle)) }.as_bool()
    }

    fn is_enabled(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindowEnabled(to_hwnd(handle)) }.as_bool()
    }

    fn is_alive(&self, handle: WindowHandle) -> bool {
        !handle.is_null() && unsafe { IsWindow(to_hwnd(handle)) }.as_bool()
    }

    fn parent(&self, handle: WindowHandle) -> Option<WindowHandle> {
        let parent = unsafe { GetAncestor(to_hwnd(handle), GA_PARENT) };
        let parent = from_hwnd(parent);
        (!parent.is_null()).then_some(parent)
    }

    fn control_id(&self, handle: WindowHandle) -> i32 {
        unsafe { GetDlgCtrlID(to_hwnd(handle)) }
    }

    fn post_click(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        self.post(handle, msg::BM_CLICK, 0, LPARAM(0))
    }

    fn post_mouse_click(&self, handle: WindowHandle, x: i32, y: i32) -> Result<(), AutomationError> {
        let point = make_lparam(x, y);
        self.post(handle, msg::WM_LBUTTONDOWN, msg::MK_LBUTTON, point)?;
        self.post(handle, msg::WM_LBUTTONUP, 0, point)
    }

    fn post_close(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        self.post(handle, msg::WM_CLOSE, 0, LPARAM(0))
    }

    fn post_key(&self, handle: WindowHandle, key: Key) -> Result<(), AutomationError> {
        let vk = input::virtual_key(key).0 as usize;
        self.post(handle, msg::WM_KEYDOWN, vk, LPARAM(0))?;
        self.post(handle, msg::WM_KEYUP, vk, LPARAM(0))
    }

    fn set_text(&self, handle: WindowHandle, value: &str) -> Result<(), AutomationError> {
        let wide = to_wide(value);
        self.send_timeout(handle, msg::WM_SETTEXT, 0, LPARAM(wide.as_ptr() as isize))
            .map(|_| ())
            .ok_or_else(|| {
                AutomationError::PlatformError(format!("WM_SETTEXT to {handle} timed out"))
            })
    }

    fn notify_parent(&self, handle: WindowHandle, code: u16) -> Result<(), AutomationError> {
        let hwnd = to_hwnd(handle);
        let id = unsafe { GetDlgCtrlID(hwnd) } as usize & 0xFFFF;
        let wparam = ((code as usize) << 16) | id;
        let parent = unsafe { GetAncestor(hwnd, GA_PARENT) };
        let root = unsafe { GetAncestor(hwnd, GA_ROOT) };
        for target in [parent, root] {
            if target.0.is_null() {
                continue;
            }
            let _ = self.send_timeout(
                from_hwnd(target),
                msg::WM_COMMAND,
                wparam,
                LPARAM(hwnd.0 as isize),
            );
            if parent == root {
                break;
            }
        }
        Ok(())
    }

    fn show_dropdown(&self, combo: WindowHandle, show: bool) -> Result<(), AutomationError> {
        self.send_timeout(combo, msg::CB_SHOWDROPDOWN, show as usize, LPARAM(0))
            .map(|_| ())
            .ok_or_else(|| {
                AutomationError::PlatformError(format!("CB_SHOWDROPDOWN to {combo} timed out"))
            })
    }

    fn combo_selection(&self, combo: WindowHandle) -> Option<i32> {
        let raw = self.send_timeout(combo, msg::CB_GETCURSEL, 0, LPARAM(0))? as isize;
        (raw != msg::CB_ERR).then_some(raw as i32)
    }

    fn list_item_count(&self, list: WindowHandle) -> Option<usize> {
        let raw = self.send_timeout(list, msg::LB_GETCOUNT, 0, LPARAM(0))? as isize;
        (raw >= 0).then_some(raw as usize)
    }

    fn list_view_cells(&self, list: WindowHandle) -> Option<Vec<Vec<String>>> {
        listview::read_cells(list)
    }

    fn set_foreground(&self, handle: WindowHandle) -> bool {
        let hwnd = unsafe { GetAncestor(to_hwnd(handle), GA_ROOT) };
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            let _ = BringWindowToTop(hwnd);
            let result = SetForegroundWindow(hwnd).as_bool();
            if !result {
                debug!("SetForegroundWindow refused for {}", handle);
            }
            result
        }
    }

    fn set_focus(&self, handle: WindowHandle) -> bool {
        let hwnd = to_hwnd(handle);
        unsafe {
            let target_thread = GetWindowThreadProcessId(hwnd, None);
            let own_thread = GetCurrentThreadId();
            let attached = target_thread != own_thread
                && AttachThreadInput(own_thread, target_thread, TRUE).as_bool();
            let focused = SetFocus(hwnd).is_ok();
            if attached {
                let _ = AttachThreadInput(own_thread, target_thread, FALSE);
            }
            focused
        }
    }

    fn send_keys(&self, keys: &[KeyStroke]) -> Result<(), AutomationError> {
        input::send_keys(keys)
    }

    fn click_at(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        input::click_at(x, y)
    }

    fn clipboard_text(&self) -> Option<String> {
        self.with_clipboard(|| unsafe {
            let data = GetClipboardData(CF_UNICODETEXT).ok()?;
            let global = windows::Win32::Foundation::HGLOBAL(data.0);
            let locked = GlobalLock(global) as *const u16;
            if locked.is_null() {
                return None;
            }
            let mut len = 0usize;
            while *locked.add(len) != 0 {
                len += 1;
            }
            let text = String::from_utf16_lossy(std::slice::from_raw_parts(locked, len));
            let _ = GlobalUnlock(global);
            Some(text)
        })
        .flatten()
    }

    fn set_clipboard_text(&self, value: &str) -> Result<(), AutomationError> {
        let wide = to_wide(value);
        let outcome = self.with_clipboard(|| unsafe {
            let bytes = wide.len() * std::mem::size_of::<u16>();
            let global = GlobalAlloc(GMEM_MOVEABLE, bytes)
                .map_err(|e| AutomationError::PlatformError(format!("GlobalAlloc failed: {e}")))?;
            let locked = GlobalLock(global) as *mut u16;
            if locked.is_null() {
                return Err(AutomationError::PlatformError(
                    "GlobalLock failed".to_string(),
                ));
            }
            std::ptr::copy_nonoverlapping(wide.as_ptr(), locked, wide.len());
            let _ = GlobalUnlock(global);
            let _ = EmptyClipboard();
            SetClipboardData(CF_UNICODETEXT, HANDLE(global.0))
                .map(|_| ())
                .map_err(|e| AutomationError::PlatformError(format!("SetClipboardData failed: {e}")))
        });
        outcome.unwrap_or_else(|| {
            Err(AutomationError::PlatformError(
                "clipboard is busy".to_string(),
            ))
        })
    }

    fn menu_command(&self, window: WindowHandle, path: &[&str]) -> Result<(), AutomationError> {
        let not_found = || AutomationError::ElementNotFound(format!("menu item '{}'", path.join(" -> ")));
        let (last, parents) = path.split_last().ok_or_else(not_found)?;
        let mut menu = unsafe { GetMenu(to_hwnd(window)) };
        if menu.0.is_null() {
            return Err(not_found());
        }
        for caption in parents {
            let position = Self::find_menu_item(menu, caption).ok_or_else(not_found)?;
            menu = unsafe { GetSubMenu(menu, position) };
            if menu.0.is_null() {
                return Err(not_found());
            }
        }
        let position = Self::find_menu_item(menu, last).ok_or_else(not_found)?;
        let id = unsafe { GetMenuItemID(menu, position) };
        if id == u32::MAX {
            return Err(not_found());
        }
        debug!("Posting menu command {} ({}) to {}", id, path.join(" -> "), window);
        self.post(window, msg::WM_COMMAND, id as usize & 0xFFFF, LPARAM(0))
    }

    fn launch(&self, exe_path: &Path, elevated: bool) -> Result<Option<u32>, AutomationError> {
        let directory = exe_path.parent().unwrap_or_else(|| Path::new("."));
        if elevated {
            let verb = HSTRING::from("runas");
            let file = HSTRING::from(exe_path.to_string_lossy().as_ref());
            let dir = HSTRING::from(directory.to_string_lossy().as_ref());
            let result = unsafe {
                ShellExecuteW(
                    None,
                    PCWSTR(verb.as_ptr()),
                    PCWSTR(file.as_ptr()),
                    PCWSTR::null(),
                    PCWSTR(dir.as_ptr()),
                    SW_SHOWNORMAL,
                )
            };
            // A value > 32 indicates success for ShellExecuteW
            if result.0 as isize <= 32 {
                return Err(AutomationError::PlatformError(format!(
                    "Failed to launch {} elevated. Error code: {:?}",
                    exe_path.display(),
                    result.0
                )));
            }
            return Ok(None);
        }
        let child = std::process::Command::new(exe_path)
            .current_dir(directory)
            .spawn()
            .map_err(|e| {
                AutomationError::PlatformError(format!(
                    "Failed to launch {}: {e}",
                    exe_path.display()
                ))
            })?;
        Ok(Some(child.id()))
    }

    fn kill_processes(&self, image_name: &str) -> usize {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut killed = 0;
        for process in system.processes().values() {
            if process.name().to_string_lossy().eq_ignore_ascii_case(image_name) && process.kill() {
                killed += 1;
            }
        }
        killed
    }

    fn is_elevated(&self) -> bool {
        unsafe {
            let mut token = HANDLE::default();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
                return false;
            }
            let token = HandleGuard(token);
            let mut elevation = TOKEN_ELEVATION::default();
            let mut returned = 0u32;
            GetTokenInformation(
                token.0,
                TokenElevation,
                Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            )
            .is_ok()
                && elevation.TokenIsElevated != 0
        }
    }
}
