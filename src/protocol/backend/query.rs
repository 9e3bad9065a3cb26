//! Messages describing and carrying query results.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_u16, read_u32};
use crate::protocol::types::Oid;

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (negative for variable-width types)
    pub type_size: I16BE,
    /// Type modifier
    pub type_modifier: I32BE,
    /// Format code
    pub format: U16BE,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    pub tail: &'a FieldDescriptionTail,
}

/// RowDescription: the columns of a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (num_fields, mut data) = read_u16(payload)?;
        let mut fields = Vec::with_capacity(num_fields as usize);

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = FieldDescriptionTail::ref_from_prefix(rest)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail ({TAIL_SIZE} bytes): {e:?}")))?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow: one row of a result set.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_u16(payload)?;
        Ok(Self {
            num_columns,
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values; `None` is SQL NULL.
    pub fn values(&self) -> DataRowValues<'a> {
        DataRowValues {
            remaining: self.num_columns,
            data: self.columns_data,
        }
    }
}

/// Iterator over the values of a [`DataRow`].
///
/// Yields an error (and then stops) if the row is truncated.
#[derive(Debug, Clone)]
pub struct DataRowValues<'a> {
    remaining: u16,
    data: &'a [u8],
}

impl<'a> Iterator for DataRowValues<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let Some((len, rest)) = self.data.split_first_chunk::<4>() else {
            self.remaining = 0;
            return Some(Err(Error::Protocol("DataRow: truncated length".into())));
        };
        let len = i32::from_be_bytes(*len);
        if len < 0 {
            self.data = rest;
            return Some(Ok(None));
        }
        match rest.split_at_checked(len as usize) {
            Some((value, rest)) => {
                self.data = rest;
                Some(Ok(Some(value)))
            }
            None => {
                self.remaining = 0;
                Some(Err(Error::Protocol("DataRow: truncated value".into())))
            }
        }
    }
}

/// CommandComplete: a statement finished.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag, e.g. `SELECT 5` or `INSERT 0 1`
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count carried by the tag, if the command reports one.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut parts = self.tag.split_whitespace();
        match parts.next()? {
            "SELECT" | "UPDATE" | "DELETE" | "COPY" | "MOVE" | "FETCH" | "MERGE" => {
                parts.next()?.parse().ok()
            }
            "INSERT" => parts.nth(1)?.parse().ok(),
            _ => None,
        }
    }
}

/// ParameterDescription: parameter types of a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_u16(payload)?;
        let mut param_oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }
        Ok(Self { param_oids })
    }

    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, type_oid: u32) -> Vec<u8> {
        let mut out = name.as_bytes().to_vec();
        out.push(0);
        out.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        out.extend_from_slice(&0_i16.to_be_bytes()); // column id
        out.extend_from_slice(&type_oid.to_be_bytes());
        out.extend_from_slice(&(-1_i16).to_be_bytes());
        out.extend_from_slice(&(-1_i32).to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes());
        out
    }

    #[test]
    fn parse_row_description() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        payload.extend(field("id", 23));
        payload.extend(field("name", 25));

        let desc = RowDescription::parse(&payload).unwrap();
        let names: Vec<_> = desc.fields().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(desc.fields()[0].tail.type_oid.get(), 23);
        assert_eq!(desc.fields()[1].tail.format.get(), 0);
    }

    #[test]
    fn truncated_row_description() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"id\0\0\0");
        assert!(RowDescription::parse(&payload).is_err());
    }

    #[test]
    fn data_row_values_with_null() {
        let mut payload = 3_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1_i32.to_be_bytes());
        payload.extend_from_slice(b"1");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        let values: Vec<_> = row.values().collect::<Result<_>>().unwrap();
        assert_eq!(values, vec![Some(&b"1"[..]), None, Some(&b""[..])]);
    }

    #[test]
    fn data_row_truncated_value() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&5_i32.to_be_bytes());
        payload.extend_from_slice(b"ab");

        let row = DataRow::parse(&payload).unwrap();
        let mut values = row.values();
        assert!(values.next().unwrap().is_err());
        assert!(values.next().is_none());
    }

    #[test]
    fn command_tags() {
        assert_eq!(CommandComplete { tag: "SELECT 5" }.rows_affected(), Some(5));
        assert_eq!(CommandComplete { tag: "INSERT 0 3" }.rows_affected(), Some(3));
        assert_eq!(CommandComplete { tag: "CREATE TABLE" }.rows_affected(), None);
    }

    #[test]
    fn parse_parameter_description() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&25_u32.to_be_bytes());
        assert_eq!(ParameterDescription::parse(&payload).unwrap().oids(), &[23, 25]);
    }
}
