//! Data models for Casefile
//!
//! Defines the four stored record kinds: Customer, Order, FileAttachment and
//! ConnectionEndpoint. Relationship fields (`orders`, `files`, `customer`)
//! are filled by hydration and never persisted or serialized.
//!
//! The serde representation is the bulk transfer wire form, so field names
//! are PascalCase and binary content travels as base64 text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    /// Unique identifier
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub note: String,
    pub national_health_insurance_id: String,
    /// Orders placed by this customer (hydration only)
    #[serde(skip)]
    pub orders: Vec<Order>,
}

impl Customer {
    /// Create a new customer with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create a customer with a specific ID
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: String::new(),
            phone: String::new(),
            email: String::new(),
            note: String::new(),
            national_health_insurance_id: String::new(),
            orders: Vec::new(),
        }
    }

    /// Total number of files attached across all hydrated orders
    pub fn file_count(&self) -> usize {
        self.orders.iter().map(|o| o.files.len()).sum()
    }
}

/// An order, optionally assigned to a customer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    /// Unique identifier
    pub id: Uuid,
    /// Owning customer; `None` means unassigned (an empty string on the wire)
    #[serde(with = "optional_id", default)]
    pub customer_id: Option<Uuid>,
    pub order_number: String,
    pub start_date: DateTime<Utc>,
    pub note: String,
    /// Attachments without content (hydration only)
    #[serde(skip)]
    pub files: Vec<FileAttachment>,
    /// Owning customer (hydration only)
    #[serde(skip)]
    pub customer: Option<Box<Customer>>,
}

impl Order {
    /// Create a new order starting now
    pub fn new(customer_id: Option<Uuid>, order_number: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), customer_id, order_number)
    }

    /// Create an order with a specific ID
    pub fn with_id(id: Uuid, customer_id: Option<Uuid>, order_number: impl Into<String>) -> Self {
        Self {
            id,
            customer_id,
            order_number: order_number.into(),
            start_date: Utc::now(),
            note: String::new(),
            files: Vec::new(),
            customer: None,
        }
    }

    /// Set the start date
    pub fn starting_at(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self
    }
}

/// A binary attachment belonging to an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FileAttachment {
    /// Unique identifier
    pub id: Uuid,
    pub order_id: Uuid,
    pub name: String,
    pub content_type: String,
    pub note: String,
    pub hash_code: String,
    /// Payload; `None` when not loaded (lightweight projection) or unset
    #[serde(with = "content_base64", default)]
    pub content: Option<Vec<u8>>,
    /// True when this record was read from the database.
    ///
    /// Listing paths set this without loading `content`; fetch the file by ID
    /// when the payload is needed.
    #[serde(skip)]
    pub is_database_content: bool,
}

impl FileAttachment {
    /// Create a new attachment with content
    pub fn new(order_id: Uuid, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::with_id(Uuid::new_v4(), order_id, name, content)
    }

    /// Create an attachment with a specific ID
    pub fn with_id(id: Uuid, order_id: Uuid, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id,
            order_id,
            name: name.into(),
            content_type: String::new(),
            note: String::new(),
            hash_code: String::new(),
            content: Some(content),
            is_database_content: false,
        }
    }

    /// Whether the payload is present and non-empty
    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Device connection details, unique by (`url`, `server_key`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionEndpoint {
    /// Unique identifier
    pub id: Uuid,
    pub device_key: String,
    pub server_key: String,
    pub url: String,
}

impl ConnectionEndpoint {
    pub fn new(
        url: impl Into<String>,
        server_key: impl Into<String>,
        device_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_key: device_key.into(),
            server_key: server_key.into(),
            url: url.into(),
        }
    }
}

/// Serde helpers for an optional UUID written as an empty string when absent
mod optional_id {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(id: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_str(&id.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => Uuid::parse_str(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Serde helpers for binary content carried as base64 text
mod content_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        content: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match content {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_new() {
        let customer = Customer::new("Ada Lovelace");
        assert_eq!(customer.name, "Ada Lovelace");
        assert!(customer.orders.is_empty());
        assert_eq!(customer.file_count(), 0);
    }

    #[test]
    fn test_customer_wire_names() {
        let mut customer = Customer::new("Ada");
        customer.national_health_insurance_id = "NHI-1".to_string();
        customer.orders.push(Order::new(Some(customer.id), "A-1"));

        let json = serde_json::to_value(&customer).unwrap();
        assert_eq!(json["Name"], "Ada");
        assert_eq!(json["NationalHealthInsuranceId"], "NHI-1");
        assert!(json.get("Orders").is_none());
    }

    #[test]
    fn test_unassigned_order_serializes_empty_customer_id() {
        let order = Order::new(None, "A-7");
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["CustomerId"], "");
        assert!(json.get("Files").is_none());
        assert!(json.get("Customer").is_none());

        let parsed: Order = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.customer_id, None);
        assert_eq!(parsed.order_number, "A-7");
    }

    #[test]
    fn test_order_accepts_null_customer_id() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"Id":"{}","CustomerId":null,"OrderNumber":"1","StartDate":"2024-03-01T10:00:00Z","Note":""}}"#,
            id
        );
        let order: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order.id, id);
        assert!(order.customer_id.is_none());
    }

    #[test]
    fn test_file_content_is_base64() {
        let file = FileAttachment::new(Uuid::new_v4(), "scan.pdf", b"hello".to_vec());
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["Content"], "aGVsbG8=");
        assert!(json.get("IsDatabaseContent").is_none());

        let parsed: FileAttachment = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.content.as_deref(), Some(&b"hello"[..]));
        assert!(!parsed.is_database_content);
    }

    #[test]
    fn test_file_missing_content_is_none() {
        let json = format!(
            r#"{{"Id":"{}","OrderId":"{}","Name":"a","ContentType":"","Note":"","HashCode":""}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let file: FileAttachment = serde_json::from_str(&json).unwrap();
        assert!(file.content.is_none());
        assert!(!file.has_content());
    }

    #[test]
    fn test_has_content_treats_empty_as_unset() {
        let mut file = FileAttachment::new(Uuid::new_v4(), "a", Vec::new());
        assert!(!file.has_content());
        file.content = Some(vec![1]);
        assert!(file.has_content());
    }
}
