//! Logical types, fields and schemas.
//!
//! A [`Schema`] is an ordered list of [`Field`]s. Fields carry a logical
//! [`DataType`] which may nest (lists, structs) and may be dictionary
//! encoded, in which case the dictionary id lives in the type itself.

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Integer width used for dictionary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Int8,
    Int16,
    Int32,
    Int64,
}

impl IndexType {
    /// Returns the key type as a plain data type.
    pub fn data_type(&self) -> DataType {
        match self {
            IndexType::Int8 => DataType::Int8,
            IndexType::Int16 => DataType::Int16,
            IndexType::Int32 => DataType::Int32,
            IndexType::Int64 => DataType::Int64,
        }
    }

    pub fn byte_width(&self) -> usize {
        match self {
            IndexType::Int8 => 1,
            IndexType::Int16 => 2,
            IndexType::Int32 => 4,
            IndexType::Int64 => 8,
        }
    }

    /// Largest key representable in this width.
    pub fn max_key(&self) -> i64 {
        match self {
            IndexType::Int8 => i8::MAX as i64,
            IndexType::Int16 => i16::MAX as i64,
            IndexType::Int32 => i32::MAX as i64,
            IndexType::Int64 => i64::MAX,
        }
    }

    /// Maps a plain integer type back to a key width.
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Int8 => Some(IndexType::Int8),
            DataType::Int16 => Some(IndexType::Int16),
            DataType::Int32 => Some(IndexType::Int32),
            DataType::Int64 => Some(IndexType::Int64),
            _ => None,
        }
    }
}

/// Logical column type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
    Binary,
    List(Box<Field>),
    Struct(Vec<Field>),
    Dictionary {
        id: i64,
        index_type: IndexType,
        value_type: Box<DataType>,
        #[serde(default)]
        ordered: bool,
    },
}

impl DataType {
    /// Creates a dictionary type with the given id, key width and value type.
    pub fn dictionary(id: i64, index_type: IndexType, value_type: DataType) -> Self {
        DataType::Dictionary {
            id,
            index_type,
            value_type: Box::new(value_type),
            ordered: false,
        }
    }

    /// Creates a list type whose items are nullable values of `item`.
    pub fn list(item: DataType) -> Self {
        DataType::List(Box::new(Field::new("item", item, true)))
    }

    /// Width in bytes of one value for fixed-width numeric types.
    pub fn primitive_width(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive_width().is_some()
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, DataType::List(_) | DataType::Struct(_))
    }

    pub fn is_dictionary(&self) -> bool {
        matches!(self, DataType::Dictionary { .. })
    }

    /// Number of physical buffers (validity included) this type contributes
    /// to a message body, not counting children.
    pub fn buffer_count(&self) -> usize {
        match self {
            DataType::Utf8 | DataType::Binary => 3,
            DataType::Struct(_) => 1,
            _ => 2,
        }
    }

    /// Dictionary ids referenced by this type, depth-first.
    pub fn dictionary_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        self.collect_dictionary_ids(&mut ids);
        ids
    }

    fn collect_dictionary_ids(&self, ids: &mut Vec<i64>) {
        match self {
            DataType::Dictionary { id, .. } => ids.push(*id),
            DataType::List(item) => item.data_type.collect_dictionary_ids(ids),
            DataType::Struct(fields) => {
                for field in fields {
                    field.data_type.collect_dictionary_ids(ids);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "bool"),
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::UInt8 => write!(f, "uint8"),
            DataType::UInt16 => write!(f, "uint16"),
            DataType::UInt32 => write!(f, "uint32"),
            DataType::UInt64 => write!(f, "uint64"),
            DataType::Float32 => write!(f, "float"),
            DataType::Float64 => write!(f, "double"),
            DataType::Utf8 => write!(f, "string"),
            DataType::Binary => write!(f, "binary"),
            DataType::List(item) => write!(f, "list<{}: {}>", item.name, item.data_type),
            DataType::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
            DataType::Dictionary {
                id,
                index_type,
                value_type,
                ordered,
            } => write!(
                f,
                "dictionary<values={}, indices={}, id={}, ordered={}>",
                value_type,
                index_type.data_type(),
                id,
                ordered
            ),
        }
    }
}

/// A named, typed column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " not null")?;
        }
        Ok(())
    }
}

/// Shared, immutable schema handle.
pub type SchemaRef = Arc<Schema>;

/// Ordered list of fields plus free-form key/value metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            metadata: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Position of the first field named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Compares field lists only, ignoring schema-level metadata.
    pub fn fields_match(&self, other: &Schema) -> bool {
        self.fields == other.fields
    }

    /// Value type of every dictionary id used by the schema.
    pub fn dictionary_value_types(&self) -> HashMap<i64, DataType> {
        let mut types = HashMap::new();
        for field in &self.fields {
            collect_dictionary_value_types(&field.data_type, &mut types);
        }
        types
    }

    /// Checks dictionary consistency across the schema.
    ///
    /// A dictionary id may appear in several fields but must always carry the
    /// same value type, and dictionary value types may not themselves be
    /// dictionary encoded.
    pub fn validate(&self) -> Result<(), DataError> {
        let mut seen: HashMap<i64, &DataType> = HashMap::new();
        for field in &self.fields {
            validate_type(&field.data_type, &mut seen)?;
        }
        Ok(())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

fn collect_dictionary_value_types(data_type: &DataType, types: &mut HashMap<i64, DataType>) {
    match data_type {
        DataType::Dictionary { id, value_type, .. } => {
            types.entry(*id).or_insert_with(|| (**value_type).clone());
        }
        DataType::List(item) => collect_dictionary_value_types(&item.data_type, types),
        DataType::Struct(fields) => {
            for field in fields {
                collect_dictionary_value_types(&field.data_type, types);
            }
        }
        _ => {}
    }
}

fn validate_type<'a>(
    data_type: &'a DataType,
    seen: &mut HashMap<i64, &'a DataType>,
) -> Result<(), DataError> {
    match data_type {
        DataType::Dictionary { id, value_type, .. } => {
            if !value_type.dictionary_ids().is_empty() {
                return Err(DataError::UnsupportedType(format!(
                    "dictionary {} has a dictionary-encoded value type",
                    id
                )));
            }
            if let Some(existing) = seen.get(id) {
                if *existing != value_type.as_ref() {
                    return Err(DataError::Dictionary(format!(
                        "id {} used with value types {} and {}",
                        id, existing, value_type
                    )));
                }
            } else {
                seen.insert(*id, value_type.as_ref());
            }
            validate_type(value_type, seen)
        }
        DataType::List(item) => validate_type(&item.data_type, seen),
        DataType::Struct(fields) => {
            for field in fields {
                validate_type(&field.data_type, seen)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Fixed-width native value that maps onto a primitive [`DataType`].
pub trait NativeType: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const WIDTH: usize;

    fn data_type() -> DataType;

    fn write_le(self, out: &mut Vec<u8>);

    /// Reads one value from exactly `WIDTH` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! native_type {
    ($t:ty, $variant:ident) => {
        impl NativeType for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn data_type() -> DataType {
                DataType::$variant
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(raw)
            }
        }
    };
}

native_type!(i8, Int8);
native_type!(i16, Int16);
native_type!(i32, Int32);
native_type!(i64, Int64);
native_type!(u8, UInt8);
native_type!(u16, UInt16);
native_type!(u32, UInt32);
native_type!(u64, UInt64);
native_type!(f32, Float32);
native_type!(f64, Float64);
