//! Registry-backed configuration store.
//!
//! Values live under `HKLM\SYSTEM\CurrentControlSet\Services\<name>\Parameters`, next to the
//! service's own registration.

use std::ffi::c_void;

use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_SUCCESS};
use windows::Win32::System::Registry::{
    HKEY_LOCAL_MACHINE, REG_DWORD, REG_DWORD_BIG_ENDIAN, REG_EXPAND_SZ, REG_MULTI_SZ, REG_QWORD,
    REG_SZ, REG_VALUE_TYPE, RRF_RT_ANY, RegGetValueW,
};
use windows::core::PCWSTR;

use super::{ConfigStore, ConfigValue, ServiceName};
use crate::error::ConfigError;

/// Registry path of the `Parameters` key for `name`, relative to `HKEY_LOCAL_MACHINE`.
pub(crate) fn parameters_key(name: &ServiceName) -> String {
    format!("SYSTEM\\CurrentControlSet\\Services\\{name}\\Parameters")
}

#[derive(Clone, Debug)]
pub struct RegistryStore {
    sub_key: String,
}

impl RegistryStore {
    pub fn for_service(name: &ServiceName) -> Self {
        Self {
            sub_key: parameters_key(name),
        }
    }
}

impl ConfigStore for RegistryStore {
    fn location(&self) -> String {
        format!("HKLM\\{}", self.sub_key)
    }

    fn read(&self, key: &str) -> Result<Option<ConfigValue>, ConfigError> {
        let sub_key = to_wide(&self.sub_key);
        let value_name = to_wide(key);

        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let mut value_type = REG_VALUE_TYPE::default();
            let mut size = buffer.len() as u32;
            let data = if buffer.is_empty() {
                None
            } else {
                Some(buffer.as_mut_ptr() as *mut c_void)
            };

            let status = unsafe {
                RegGetValueW(
                    HKEY_LOCAL_MACHINE,
                    PCWSTR::from_raw(sub_key.as_ptr()),
                    PCWSTR::from_raw(value_name.as_ptr()),
                    RRF_RT_ANY,
                    Some(&mut value_type),
                    data,
                    Some(&mut size),
                )
            };

            if status == ERROR_FILE_NOT_FOUND {
                return Ok(None);
            }
            // First pass only asks for the size; a value that grew in between asks again.
            if (status == ERROR_SUCCESS && buffer.is_empty() && size > 0) || status == ERROR_MORE_DATA {
                buffer = vec![0; size as usize];
                continue;
            }
            if status != ERROR_SUCCESS {
                return Err(ConfigError::Store {
                    location: self.location(),
                    reason: format!("reading {key} failed with error {}", status.0),
                });
            }

            buffer.truncate(size as usize);
            return Ok(Some(decode(value_type, &buffer)));
        }
    }
}

fn decode(value_type: REG_VALUE_TYPE, data: &[u8]) -> ConfigValue {
    match value_type {
        REG_DWORD if data.len() >= 4 => {
            ConfigValue::Integer(u32::from_le_bytes([data[0], data[1], data[2], data[3]]).into())
        }
        REG_DWORD_BIG_ENDIAN if data.len() >= 4 => {
            ConfigValue::Integer(u32::from_be_bytes([data[0], data[1], data[2], data[3]]).into())
        }
        REG_QWORD if data.len() >= 8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[..8]);
            ConfigValue::Integer(u64::from_le_bytes(bytes))
        }
        REG_SZ | REG_EXPAND_SZ => match utf16_strings(data).into_iter().next() {
            Some(Ok(s)) => ConfigValue::Text(s),
            Some(Err(())) => ConfigValue::Other("invalid UTF-16 string".to_string()),
            None => ConfigValue::Text(String::new()),
        },
        REG_MULTI_SZ => {
            let strings: Result<Vec<String>, ()> = utf16_strings(data).into_iter().collect();
            match strings {
                Ok(list) => ConfigValue::TextList(list),
                Err(()) => ConfigValue::Other("invalid UTF-16 string list".to_string()),
            }
        }
        other => ConfigValue::Other(format!("registry type {}", other.0)),
    }
}

// Splits a NUL-separated, double-NUL-terminated UTF-16 buffer.
fn utf16_strings(data: &[u8]) -> Vec<Result<String, ()>> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    units
        .split(|unit| *unit == 0)
        .take_while(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf16(chunk).map_err(|_| ()))
        .collect()
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
