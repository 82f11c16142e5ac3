//! The `crypto` host module: incremental hashes plus random helpers.
//!
//! Hash objects are opaque host values; `update` may be called any
//! number of times before a single `digest`, and splitting the input
//! across updates never changes the result.

use std::cell::RefCell;
use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest as _, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::{VmError, VmResult};
use crate::modules::ExportTable;
use crate::value::{BufferData, HostObject, Value};
use crate::vm::Vm;

enum HashState {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HashState {
    fn of(algorithm: &str) -> VmResult<Self> {
        match algorithm.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5(Md5::new())),
            "sha1" | "sha-1" => Ok(Self::Sha1(Sha1::new())),
            "sha256" | "sha-256" => Ok(Self::Sha256(Sha256::new())),
            "sha512" | "sha-512" => Ok(Self::Sha512(Sha512::new())),
            other => Err(VmError::Host {
                code: "ERR_CRYPTO_INVALID_DIGEST".into(),
                message: format!("Unsupported hash algorithm: {other}"),
            }),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// A `crypto.createHash` result
pub struct Hash {
    state: RefCell<Option<HashState>>,
}

impl HostObject for Hash {
    fn class_name(&self) -> &'static str {
        "Hash"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn call_method(
        &self,
        vm: &mut Vm,
        this: &Value,
        name: &str,
        args: &[Value],
    ) -> VmResult<Value> {
        match name {
            "update" => {
                let data = hash_input(vm, args.first())?;
                match &mut *self.state.borrow_mut() {
                    Some(state) => state.update(&data),
                    None => {
                        return Err(VmError::Host {
                            code: "ERR_CRYPTO_HASH_FINALIZED".into(),
                            message: "Digest already called".into(),
                        });
                    }
                }
                Ok(this.clone())
            }
            "digest" => {
                let state = self.state.borrow_mut().take().ok_or_else(|| VmError::Host {
                    code: "ERR_CRYPTO_HASH_FINALIZED".into(),
                    message: "Digest already called".into(),
                })?;
                let bytes = state.finalize();
                match args.first() {
                    None | Some(Value::Undefined) => Ok(Value::Buffer(Rc::new(BufferData {
                        bytes: RefCell::new(bytes),
                    }))),
                    Some(Value::Str(encoding)) => match &**encoding {
                        "hex" => Ok(Value::str(hex::encode(bytes))),
                        "base64" => Ok(Value::str(BASE64.encode(bytes))),
                        other => Err(VmError::type_error(format!("Unknown encoding: {other}"))),
                    },
                    Some(other) => Err(VmError::type_error(format!(
                        "Encoding must be a string, got {}",
                        other.type_of()
                    ))),
                }
            }
            other => Err(VmError::type_error(format!("hash.{other} is not a function"))),
        }
    }
}

fn hash_input(vm: &mut Vm, value: Option<&Value>) -> VmResult<Vec<u8>> {
    match value {
        Some(Value::Str(s)) => Ok(s.as_bytes().to_vec()),
        Some(Value::Buffer(b)) => Ok(b.bytes.borrow().clone()),
        Some(other) => {
            let text = crate::ops::stringify(vm, other)?;
            Ok(text.as_bytes().to_vec())
        }
        None => Err(VmError::type_error("hash.update requires data")),
    }
}

/// Build the module's export table
pub fn exports() -> Rc<ExportTable> {
    let table = Rc::new(ExportTable::new());

    table.store(
        "createHash",
        Value::native("createHash", |vm, _this, args| {
            let algorithm = match args.first() {
                Some(Value::Str(s)) => s.clone(),
                Some(other) => crate::ops::stringify(vm, other)?,
                None => {
                    return Err(VmError::type_error(
                        "createHash requires an algorithm name",
                    ));
                }
            };
            Ok(Value::Host(Rc::new(Hash {
                state: RefCell::new(Some(HashState::of(&algorithm)?)),
            })))
        }),
    );

    table.store(
        "randomBytes",
        Value::native("randomBytes", |vm, _this, args| {
            let size = match args.first() {
                Some(v) => crate::ops::to_number(vm, v)? as usize,
                None => 0,
            };
            let bytes: Vec<u8> = (0..size).map(|_| vm.next_random_byte()).collect();
            Ok(Value::Buffer(Rc::new(BufferData {
                bytes: RefCell::new(bytes),
            })))
        }),
    );

    table.store(
        "randomUUID",
        Value::native("randomUUID", |vm, _this, _args| {
            let mut bytes = [0u8; 16];
            for b in bytes.iter_mut() {
                *b = vm.next_random_byte();
            }
            bytes[6] = (bytes[6] & 0x0f) | 0x40; // version 4
            bytes[8] = (bytes[8] & 0x3f) | 0x80; // variant
            let hex = hex::encode(bytes);
            Ok(Value::str(format!(
                "{}-{}-{}-{}-{}",
                &hex[0..8],
                &hex[8..12],
                &hex[12..16],
                &hex[16..20],
                &hex[20..32]
            )))
        }),
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    fn digest_hex(vm: &mut Vm, algorithm: &str, parts: &[&str]) -> String {
        let table = exports();
        let create = table.slot("createHash").get();
        let hash = vm
            .call_value(&create, Value::Undefined, &[Value::str(algorithm)])
            .unwrap();
        for part in parts {
            vm.call_method_dynamic(&hash, "update", &[Value::str(*part)])
                .unwrap();
        }
        let digest = vm
            .call_method_dynamic(&hash, "digest", &[Value::str("hex")])
            .unwrap();
        digest.as_str().unwrap().to_string()
    }

    #[test]
    fn sha256_known_vector() {
        let mut vm = Vm::for_tests();
        assert_eq!(
            digest_hex(&mut vm, "sha256", &["hello"]),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn incremental_update_equivalence() {
        let mut vm = Vm::for_tests();
        let split = digest_hex(&mut vm, "sha256", &["hel", "lo"]);
        let whole = digest_hex(&mut vm, "sha256", &["hello"]);
        assert_eq!(split, whole);
    }

    #[test]
    fn double_digest_is_an_error() {
        let mut vm = Vm::for_tests();
        let table = exports();
        let create = table.slot("createHash").get();
        let hash = vm
            .call_value(&create, Value::Undefined, &[Value::str("sha1")])
            .unwrap();
        vm.call_method_dynamic(&hash, "digest", &[Value::str("hex")])
            .unwrap();
        assert!(
            vm.call_method_dynamic(&hash, "digest", &[Value::str("hex")])
                .is_err()
        );
    }

    #[test]
    fn unknown_algorithm_is_host_error() {
        let mut vm = Vm::for_tests();
        let table = exports();
        let create = table.slot("createHash").get();
        let err = vm
            .call_value(&create, Value::Undefined, &[Value::str("crc32")])
            .unwrap_err();
        assert!(matches!(err, VmError::Host { .. }));
    }
}
