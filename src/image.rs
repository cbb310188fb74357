/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! The headered binary container: magic, ISA name, code size, entry
//! point, then the machine code. Raw images are machine code only.

use crate::errors::AssemblyError;

pub const MAGIC: [u8; 4] = [0x49, 0x53, 0x41, 0x01]; // "ISA\x01"

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub isa_name: String,
    pub code_size: u32,
    pub entry_point: u32,
}

/// Wraps machine code in the headered container.
pub fn write_image(
    isa_name: &str,
    entry_point: u32,
    code: &[u8],
) -> Result<Vec<u8>, AssemblyError> {
    let name_bytes = isa_name.as_bytes();
    if name_bytes.is_empty() || name_bytes.len() > 255 {
        return Err(AssemblyError::Validation {
            reason: format!(
                "ISA name must be 1..=255 bytes in the binary header, got {}",
                name_bytes.len()
            ),
        });
    }
    let mut image = Vec::with_capacity(13 + name_bytes.len() + code.len());
    image.extend_from_slice(&MAGIC);
    image.push(name_bytes.len() as u8);
    image.extend_from_slice(name_bytes);
    image.extend_from_slice(&(code.len() as u32).to_le_bytes());
    image.extend_from_slice(&entry_point.to_le_bytes());
    image.extend_from_slice(code);
    Ok(image)
}

/// Splits a headered image into its header and code bytes. Returns
/// `Ok(None)` when the magic is absent (a raw image); a present magic
/// with a broken header is an error.
pub fn parse_image(bytes: &[u8]) -> Result<Option<(Header, &[u8])>, AssemblyError> {
    if bytes.len() < 4 || bytes[..4] != MAGIC {
        return Ok(None);
    }
    let truncated = || AssemblyError::Decoding {
        address: 0,
        reason: "truncated image header".to_string(),
    };
    let name_len = *bytes.get(4).ok_or_else(truncated)? as usize;
    let name_end = 5 + name_len;
    let fixed_end = name_end + 8;
    if bytes.len() < fixed_end {
        return Err(truncated());
    }
    let isa_name = std::str::from_utf8(&bytes[5..name_end])
        .map_err(|_| AssemblyError::Decoding {
            address: 0,
            reason: "ISA name in header is not valid UTF-8".to_string(),
        })?
        .to_string();
    let code_size = u32::from_le_bytes(bytes[name_end..name_end + 4].try_into().unwrap());
    let entry_point =
        u32::from_le_bytes(bytes[name_end + 4..name_end + 8].try_into().unwrap());
    let code = &bytes[fixed_end..];
    if code.len() != code_size as usize {
        return Err(AssemblyError::Decoding {
            address: 0,
            reason: format!(
                "header claims {} code bytes, image carries {}",
                code_size,
                code.len()
            ),
        });
    }
    Ok(Some((
        Header {
            isa_name,
            code_size,
            entry_point,
        },
        code,
    )))
}
