//! Global keyboard and mouse injection through `SendInput`.

use crate::platforms::{Key, KeyStroke, Modifier};
use crate::AutomationError;
use std::mem;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_ABSOLUTE,
    MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_VIRTUALDESK,
    MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_BACK, VK_CONTROL, VK_END, VK_ESCAPE, VK_F4, VK_HOME, VK_MENU,
    VK_RETURN, VK_SHIFT, VK_TAB,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN,
};

pub(crate) fn virtual_key(key: Key) -> VIRTUAL_KEY {
    match key {
        Key::Enter => VK_RETURN,
        Key::Escape => VK_ESCAPE,
        Key::Tab => VK_TAB,
        Key::Backspace => VK_BACK,
        Key::Home => VK_HOME,
        Key::End => VK_END,
        Key::F4 => VK_F4,
        Key::Char(c) if c.is_ascii_alphanumeric() => VIRTUAL_KEY(c.to_ascii_uppercase() as u16),
        Key::Char(c) => {
            let scan = unsafe { VkKeyScanW(c as u16) };
            VIRTUAL_KEY((scan as u16) & 0xFF)
        }
    }
}

fn modifier_key(modifier: Modifier) -> VIRTUAL_KEY {
    match modifier {
        Modifier::Ctrl => VK_CONTROL,
        Modifier::Alt => VK_MENU,
        Modifier::Shift => VK_SHIFT,
    }
}

fn is_extended(vk: VIRTUAL_KEY) -> bool {
    matches!(vk, VK_HOME | VK_END)
}

fn key_input(vk: VIRTUAL_KEY, up: bool) -> INPUT {
    let mut flags = if is_extended(vk) {
        KEYEVENTF_EXTENDEDKEY
    } else {
        KEYBD_EVENT_FLAGS(0)
    };
    if up {
        flags |= KEYEVENTF_KEYUP;
    }
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn unicode_input(unit: u16, up: bool) -> INPUT {
    let flags = if up {
        KEYEVENTF_UNICODE | KEYEVENTF_KEYUP
    } else {
        KEYEVENTF_UNICODE
    };
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: unit,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn dispatch(inputs: &[INPUT]) -> Result<(), AutomationError> {
    if inputs.is_empty() {
        return Ok(());
    }
    let sent = unsafe { SendInput(inputs, mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(AutomationError::PlatformError(format!(
            "SendInput delivered {sent} of {} events",
            inputs.len()
        )));
    }
    Ok(())
}

pub(crate) fn send_keys(keys: &[KeyStroke]) -> Result<(), AutomationError> {
    for stroke in keys {
        let mut inputs = Vec::new();
        match stroke {
            KeyStroke::Text(value) => {
                for unit in value.encode_utf16() {
                    inputs.push(unicode_input(unit, false));
                    inputs.push(unicode_input(unit, true));
                }
            }
            KeyStroke::Press(key) => {
                let vk = virtual_key(*key);
                inputs.push(key_input(vk, false));
                inputs.push(key_input(vk, true));
            }
            KeyStroke::Chord(modifier, key) => {
                let held = modifier_key(*modifier);
                let vk = virtual_key(*key);
                inputs.push(key_input(held, false));
                inputs.push(key_input(vk, false));
                inputs.push(key_input(vk, true));
                inputs.push(key_input(held, true));
            }
        }
        dispatch(&inputs)?;
    }
    Ok(())
}

/// Physical left click at a screen point, normalised over the virtual desktop.
pub(crate) fn click_at(x: i32, y: i32) -> Result<(), AutomationError> {
    let (width, height, origin_x, origin_y) = unsafe {
        (
            GetSystemMetrics(SM_CXVIRTUALSCREEN),
            GetSystemMetrics(SM_CYVIRTUALSCREEN),
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
        )
    };
    if width <= 0 || height <= 0 {
        return Err(AutomationError::PlatformError(
            "virtual screen has no extent".to_string(),
        ));
    }
    let abs_x = (x - origin_x) * 65535 / width;
    let abs_y = (y - origin_y) * 65535 / height;
    let flags = MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK | MOUSEEVENTF_MOVE;
    let mouse = |extra: MOUSE_EVENT_FLAGS| INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: abs_x,
                dy: abs_y,
                mouseData: 0,
                dwFlags: flags | extra,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };
    dispatch(&[mouse(MOUSEEVENTF_LEFTDOWN), mouse(MOUSEEVENTF_LEFTUP)])
}
