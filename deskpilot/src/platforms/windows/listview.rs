//! Reads report-style list views owned by another process.
//!
//! `LVM_GETITEMTEXTW` writes through a pointer, so the `LVITEMW` and its
//! text buffer have to live in the target's address space.

use super::types::{to_hwnd, HandleGuard};
use crate::WindowHandle;
use std::ffi::c_void;
use std::mem;
use tracing::debug;
use windows::core::PWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
};
use windows::Win32::UI::Controls::{LVIF_TEXT, LVITEMW};
use windows::Win32::UI::WindowsAndMessaging::{GetWindowThreadProcessId, SendMessageW};

const LVM_FIRST: u32 = 0x1000;
const LVM_GETITEMCOUNT: u32 = LVM_FIRST + 4;
const LVM_GETHEADER: u32 = LVM_FIRST + 31;
const LVM_GETITEMTEXTW: u32 = LVM_FIRST + 115;
const HDM_GETITEMCOUNT: u32 = 0x1200;
const TEXT_CAPACITY: usize = 512;

struct RemoteBlock {
    process: HandleGuard,
    address: *mut c_void,
}

impl Drop for RemoteBlock {
    fn drop(&mut self) {
        unsafe {
            let _ = VirtualFreeEx(self.process.0, self.address, 0, MEM_RELEASE);
        }
    }
}

fn column_count(list: HWND) -> usize {
    unsafe {
        let header = SendMessageW(list, LVM_GETHEADER, WPARAM(0), LPARAM(0));
        if header.0 == 0 {
            return 0;
        }
        let count = SendMessageW(
            HWND(header.0 as *mut c_void),
            HDM_GETITEMCOUNT,
            WPARAM(0),
            LPARAM(0),
        );
        count.0.max(0) as usize
    }
}

fn open_remote(list: HWND) -> Option<RemoteBlock> {
    unsafe {
        let mut pid = 0u32;
        GetWindowThreadProcessId(list, Some(&mut pid as *mut u32));
        if pid == 0 {
            return None;
        }
        let process = OpenProcess(
            PROCESS_VM_OPERATION | PROCESS_VM_READ | PROCESS_VM_WRITE,
            false,
            pid,
        )
        .ok()?;
        let process = HandleGuard(process);
        let size = mem::size_of::<LVITEMW>() + TEXT_CAPACITY * 2;
        let address = VirtualAllocEx(
            process.0,
            None,
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if address.is_null() {
            return None;
        }
        Some(RemoteBlock { process, address })
    }
}

fn read_cell(block: &RemoteBlock, list: HWND, row: usize, column: usize) -> Option<String> {
    unsafe {
        let text_address = (block.address as *mut u8).add(mem::size_of::<LVITEMW>());
        let item = LVITEMW {
            mask: LVIF_TEXT,
            iItem: row as i32,
            iSubItem: column as i32,
            pszText: PWSTR(text_address as *mut u16),
            cchTextMax: TEXT_CAPACITY as i32,
            ..Default::default()
        };
        WriteProcessMemory(
            block.process.0,
            block.address,
            &item as *const LVITEMW as *const c_void,
            mem::size_of::<LVITEMW>(),
            None,
        )
        .ok()?;
        let copied = SendMessageW(
            list,
            LVM_GETITEMTEXTW,
            WPARAM(row),
            LPARAM(block.address as isize),
        );
        let mut buffer = [0u16; TEXT_CAPACITY];
        ReadProcessMemory(
            block.process.0,
            text_address as *const c_void,
            buffer.as_mut_ptr() as *mut c_void,
            TEXT_CAPACITY * 2,
            None,
        )
        .ok()?;
        let len = (copied.0.max(0) as usize).min(TEXT_CAPACITY);
        let end = buffer[..len]
            .iter()
            .position(|unit| *unit == 0)
            .unwrap_or(len);
        Some(String::from_utf16_lossy(&buffer[..end]).trim().to_string())
    }
}

/// All cell texts, rows by columns. `None` when the control is not a list
/// view or its memory could not be reached.
pub(crate) fn read_cells(handle: WindowHandle) -> Option<Vec<Vec<String>>> {
    let list = to_hwnd(handle);
    let rows = unsafe { SendMessageW(list, LVM_GETITEMCOUNT, WPARAM(0), LPARAM(0)) }.0;
    let columns = column_count(list);
    if rows <= 0 || columns == 0 {
        return None;
    }
    let block = open_remote(list)?;
    let mut table = Vec::with_capacity(rows as usize);
    for row in 0..rows as usize {
        let mut cells = Vec::with_capacity(columns);
        for column in 0..columns {
            cells.push(read_cell(&block, list, row, column).unwrap_or_default());
        }
        table.push(cells);
    }
    debug!(
        "Read {} rows x {} columns from list view {}",
        table.len(),
        columns,
        handle
    );
    Some(table)
}
