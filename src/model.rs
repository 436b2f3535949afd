//! Model capabilities: what a type must provide to be registered as a resource.
//!
//! Instead of runtime reflection, a model declares its name ([`Nameable`]) and exposes its
//! [`SystemData`] ([`Entity`]); identity and ownership come from there. Everything else the
//! registry needs (field keys, generic records) is derived from the serde shape of the type.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Generic key -> value representation of an entity. Used for validation, diffing and storage.
pub type Record = Map<String, Value>;

/// Storage-assigned identifier.
pub type EntityId = i64;

/// Wire names of the system fields every entity carries.
pub const FIELD_ID: &str = "ID";
pub const FIELD_CREATED_AT: &str = "CreatedAt";
pub const FIELD_UPDATED_AT: &str = "UpdatedAt";
pub const FIELD_DELETED_AT: &str = "DeletedAt";
pub const FIELD_CREATED_BY: &str = "CreatedByID";
pub const FIELD_UPDATED_BY: &str = "UpdatedByID";

/// System fields a client may never set directly.
pub const RESTRICTED_FIELDS: &[&str] = &[
    FIELD_ID,
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
    FIELD_DELETED_AT,
    FIELD_CREATED_BY,
    FIELD_UPDATED_BY,
];

/// Identity, ownership, soft-delete marker and timestamps. Flatten into a model with
/// `#[serde(flatten)] pub system: SystemData`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemData {
    #[serde(rename = "ID", default)]
    pub id: i64,
    #[serde(rename = "CreatedAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "UpdatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "DeletedAt", default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(rename = "CreatedByID", default)]
    pub created_by_id: String,
    #[serde(rename = "UpdatedByID", default)]
    pub updated_by_id: String,
}

/// Canonical PascalCase singular name of a model, e.g. `BlogPost`.
pub trait Nameable {
    const NAME: &'static str;
}

/// Access to the embedded [`SystemData`].
pub trait Entity {
    fn system(&self) -> &SystemData;
}

pub trait Identifiable {
    /// `None` until storage has assigned an id.
    fn id(&self) -> Option<EntityId>;
}

pub trait Ownable {
    fn created_by(&self) -> Option<&str>;
}

impl<T: Entity> Identifiable for T {
    fn id(&self) -> Option<EntityId> {
        let id = self.system().id;
        (id != 0).then_some(id)
    }
}

impl<T: Entity> Ownable for T {
    fn created_by(&self) -> Option<&str> {
        let by = self.system().created_by_id.as_str();
        (!by.is_empty()).then_some(by)
    }
}

/// Everything the registry requires of a model type.
pub trait Model:
    Nameable + Entity + Serialize + DeserializeOwned + Default + ToSchema + Send + Sync + 'static
{
}

impl<T> Model for T where
    T: Nameable + Entity + Serialize + DeserializeOwned + Default + ToSchema + Send + Sync + 'static
{
}

/// Implements [`Nameable`] (name = type name) and [`Entity`] (via a `system` field) for a struct.
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize, ToSchema)]
/// #[serde(default)]
/// struct Post {
///     #[serde(flatten)]
///     system: SystemData,
///     title: String,
/// }
/// resource_sdk::impl_model!(Post);
/// ```
#[macro_export]
macro_rules! impl_model {
    ($ty:ident) => {
        $crate::impl_model!($ty, system);
    };
    ($ty:ident, $field:ident) => {
        impl $crate::model::Nameable for $ty {
            const NAME: &'static str = stringify!($ty);
        }
        impl $crate::model::Entity for $ty {
            fn system(&self) -> &$crate::model::SystemData {
                &self.$field
            }
        }
    };
}

/// Serialize any value into a generic record. Fails when the value is not a JSON object.
pub fn to_record<T: Serialize + ?Sized>(value: &T) -> Result<Record, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Round-trip a record through the model type: rejects wrongly typed fields and fills
/// omitted ones with the model's defaults.
pub fn normalize<T: Model>(record: Record) -> Result<Record, serde_json::Error> {
    let typed: T = serde_json::from_value(Value::Object(record))?;
    to_record(&typed)
}

/// Serializable field keys of a model, in serialization order of its default value.
pub fn field_keys<T: Model>() -> Result<Vec<String>, serde_json::Error> {
    Ok(to_record(&T::default())?.keys().cloned().collect())
}

/// Remove client-supplied system fields from an inbound body.
pub fn strip_restricted(record: &mut Record) {
    for key in RESTRICTED_FIELDS {
        record.remove(*key);
    }
}

/// Read the id of a generic record as a string; empty when absent or null.
pub fn record_id(record: &Record) -> String {
    match record.get(FIELD_ID) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
