//! Bytecode module format

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{Read, Write};

use crate::class::ClassDef;
use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::function::Function;
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

/// Import record for a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    /// Module specifier as written in source (e.g. "./utils" or "crypto")
    pub specifier: String,
    /// Imported bindings
    pub bindings: Vec<ImportBinding>,
}

/// A single import binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImportBinding {
    /// `import { foo } from "..."`
    Named {
        /// Exported name
        imported: String,
        /// Local binding name
        local: String,
    },
    /// `import * as foo from "..."`
    Namespace {
        /// Local binding name
        local: String,
    },
    /// `import foo from "..."`
    Default {
        /// Local binding name
        local: String,
    },
}

/// Export record for a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExportRecord {
    /// `export { local as exported }`
    Named {
        /// Local name
        local: String,
        /// Exported name
        exported: String,
    },
    /// `export default …` (slot key `$default`)
    Default,
    /// `export * from "..."`
    ReExportAll {
        /// Source module specifier
        specifier: String,
    },
}

/// Reserved export-slot key for the default export
pub const DEFAULT_EXPORT: &str = "$default";

/// A compiled bytecode module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Source URL/path
    pub source_url: String,

    /// Constant pool (shared across all functions)
    pub constants: ConstantPool,

    /// Functions defined in this module
    pub functions: Vec<Function>,

    /// Class table
    pub classes: Vec<ClassDef>,

    /// Entry point function index
    pub entry_point: u32,

    /// Import records
    pub imports: Vec<ImportRecord>,

    /// Export records
    pub exports: Vec<ExportRecord>,
}

impl Module {
    /// Create a new module builder
    pub fn builder(source_url: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder::new(source_url)
    }

    /// Serialize module to bytes (magic + version + length-prefixed payload)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());

        let data = serde_json::to_vec(self).map_err(io_invalid)?;
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Deserialize module from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(BytecodeError::UnexpectedEnd);
        }
        if bytes[0..8] != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let data_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap_or_default()) as usize;
        if bytes.len() < 16 + data_len {
            return Err(BytecodeError::UnexpectedEnd);
        }

        let mut module: Self =
            serde_json::from_slice(&bytes[16..16 + data_len]).map_err(io_invalid)?;
        module.constants.rebuild_dedup_index();
        Ok(module)
    }

    /// Write module to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Read module from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Get the entry point function
    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.get(self.entry_point as usize)
    }

    /// Get a function by index
    pub fn function(&self, index: u32) -> Option<&Function> {
        self.functions.get(index as usize)
    }

    /// Get a class by index
    pub fn class(&self, index: u32) -> Option<&ClassDef> {
        self.classes.get(index as usize)
    }

    /// Total slot count for a class including inherited slots
    pub fn class_slot_count(&self, index: u32) -> u16 {
        let mut total = 0u16;
        let mut current = self.class(index);
        while let Some(class) = current {
            total += class.own_slot_count();
            current = class.superclass.and_then(|s| self.class(s.0));
        }
        total
    }

    /// Human-readable listing of every function's instructions
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "module {}", self.source_url);
        for (i, func) in self.functions.iter().enumerate() {
            let entry = if i as u32 == self.entry_point { " (entry)" } else { "" };
            let _ = writeln!(
                out,
                "\nfn #{i} {}{entry}  params={} locals={} regs={}",
                func.display_name(),
                func.param_count,
                func.local_count,
                func.register_count
            );
            for (pc, instr) in func.instructions.iter().enumerate() {
                let _ = writeln!(out, "  {pc:4}  {instr:?}");
            }
        }
        out
    }
}

fn io_invalid(e: serde_json::Error) -> BytecodeError {
    BytecodeError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}

/// Builder for creating modules
#[derive(Debug)]
pub struct ModuleBuilder {
    source_url: String,
    constants: ConstantPool,
    functions: Vec<Function>,
    classes: Vec<ClassDef>,
    entry_point: u32,
    imports: Vec<ImportRecord>,
    exports: Vec<ExportRecord>,
}

impl ModuleBuilder {
    /// Create a new module builder
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            constants: ConstantPool::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            entry_point: 0,
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Set constant pool
    pub fn constants(mut self, constants: ConstantPool) -> Self {
        self.constants = constants;
        self
    }

    /// Get mutable reference to constant pool
    pub fn constants_mut(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Add a function, returns its index
    pub fn add_function(&mut self, function: Function) -> u32 {
        let idx = self.functions.len() as u32;
        self.functions.push(function);
        idx
    }

    /// Add a class, returns its index
    pub fn add_class(&mut self, class: ClassDef) -> u32 {
        let idx = self.classes.len() as u32;
        self.classes.push(class);
        idx
    }

    /// Set entry point function index
    pub fn entry_point(mut self, index: u32) -> Self {
        self.entry_point = index;
        self
    }

    /// Add an import record
    pub fn import(mut self, import: ImportRecord) -> Self {
        self.imports.push(import);
        self
    }

    /// Add an export record
    pub fn export(mut self, export: ExportRecord) -> Self {
        self.exports.push(export);
        self
    }

    /// Build the module
    pub fn build(self) -> Module {
        Module {
            source_url: self.source_url,
            constants: self.constants,
            functions: self.functions,
            classes: self.classes,
            entry_point: self.entry_point,
            imports: self.imports,
            exports: self.exports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operand::Register;

    #[test]
    fn module_roundtrip() {
        let mut builder = Module::builder("test.ts");
        builder.constants_mut().add_string("hello");
        builder.constants_mut().add_number(42.0);

        let func = Function::builder()
            .name("main")
            .instruction(Instruction::LoadTrue { dst: Register(0) })
            .instruction(Instruction::Return { src: Register(0) })
            .build();
        builder.add_function(func);

        let module = builder.build();
        let bytes = module.to_bytes().unwrap();
        let restored = Module::from_bytes(&bytes).unwrap();

        assert_eq!(restored.source_url, "test.ts");
        assert_eq!(restored.constants.len(), 2);
        assert_eq!(restored.functions.len(), 1);
    }

    #[test]
    fn invalid_magic() {
        let bytes = b"INVALID\0........";
        assert!(matches!(
            Module::from_bytes(bytes),
            Err(BytecodeError::InvalidMagic)
        ));
    }

    #[test]
    fn inherited_slot_count() {
        use crate::class::{PropertyDef, TypeTag};
        use crate::operand::ClassIndex;

        let mut builder = Module::builder("t.ts");
        builder.add_class(ClassDef {
            name: "Base".into(),
            superclass: None,
            properties: vec![PropertyDef {
                name: "a".into(),
                type_tag: TypeTag::Number,
                readonly: false,
            }],
            constructor: None,
            methods: Vec::new(),
            static_methods: Vec::new(),
            private_fields: Vec::new(),
            private_methods: Vec::new(),
        });
        builder.add_class(ClassDef {
            name: "Derived".into(),
            superclass: Some(ClassIndex(0)),
            properties: vec![
                PropertyDef {
                    name: "b".into(),
                    type_tag: TypeTag::Any,
                    readonly: false,
                },
                PropertyDef {
                    name: "c".into(),
                    type_tag: TypeTag::Any,
                    readonly: false,
                },
            ],
            constructor: None,
            methods: Vec::new(),
            static_methods: Vec::new(),
            private_fields: Vec::new(),
            private_methods: Vec::new(),
        });

        let module = builder.build();
        assert_eq!(module.class_slot_count(0), 1);
        assert_eq!(module.class_slot_count(1), 3);
    }
}
