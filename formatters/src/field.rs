use crate::error::FormatError;

/// A column's physical storage type (a deliberately small subset of the
/// original `PhysicalType` hierarchy -- spec component M names only that
/// fields are "strictly typed", not a specific type lattice). `VarChar`
/// carries the fixed byte width every row reserves for that column; values
/// that don't fit are a parse error rather than silently truncated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Int64,
    Float64,
    Bool,
    VarChar(usize),
}

impl FieldType {
    fn byte_width(&self) -> usize {
        match self {
            FieldType::Int64 => 8,
            FieldType::Float64 => 8,
            FieldType::Bool => 1,
            FieldType::VarChar(n) => *n,
        }
    }

    fn parser(&self) -> ParseFn {
        match self {
            FieldType::Int64 => parse_int64,
            FieldType::Float64 => parse_float64,
            FieldType::Bool => parse_bool,
            FieldType::VarChar(_) => parse_varchar,
        }
    }
}

/// One column's parse-and-write function, specialized ahead of time per
/// physical type (spec component M: "a vector of per-column type-specialized
/// functions built once from the schema", mirroring the original
/// `fieldParseFunctions`). `out` is already sliced to exactly this column's
/// byte width.
type ParseFn = fn(&str, &mut [u8]) -> Result<(), FormatError>;

fn parse_int64(field: &str, out: &mut [u8]) -> Result<(), FormatError> {
    let value: i64 = field.trim().parse().map_err(|_| FormatError::bad_field("int64", field))?;
    out.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn parse_float64(field: &str, out: &mut [u8]) -> Result<(), FormatError> {
    let value: f64 = field.trim().parse().map_err(|_| FormatError::bad_field("float64", field))?;
    out.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn parse_bool(field: &str, out: &mut [u8]) -> Result<(), FormatError> {
    let value = match field.trim() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => return Err(FormatError::bad_field("bool", field)),
    };
    out[0] = value as u8;
    Ok(())
}

fn parse_varchar(field: &str, out: &mut [u8]) -> Result<(), FormatError> {
    let bytes = field.as_bytes();
    if bytes.len() > out.len() {
        return Err(FormatError::bad_field("varchar (value exceeds column width)", field));
    }
    out[..bytes.len()].copy_from_slice(bytes);
    out[bytes.len()..].fill(0);
    Ok(())
}

/// A row layout: fixed per-column byte widths and offsets, and the
/// specialized parser for each column, derived once at construction and
/// reused for every tuple the formatter processes.
pub struct RowSchema {
    fields: Vec<FieldType>,
    offsets: Vec<usize>,
    parsers: Vec<ParseFn>,
    row_size: usize,
}

impl RowSchema {
    pub fn new(fields: Vec<FieldType>) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut row_size = 0usize;
        for field in &fields {
            offsets.push(row_size);
            row_size += field.byte_width();
        }
        let parsers = fields.iter().map(FieldType::parser).collect();
        Self {
            fields,
            offsets,
            parsers,
            row_size,
        }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Parses `field_values` (one string per column, in schema order) and
    /// writes the row at `row_index` into `out` -- a buffer holding one or
    /// more consecutive rows laid out by this schema.
    pub fn write_row(&self, field_values: &[String], out: &mut [u8], row_index: usize) -> Result<(), FormatError> {
        if field_values.len() != self.fields.len() {
            return Err(FormatError::field_count_mismatch(self.fields.len(), field_values.len()));
        }
        let row_start = row_index * self.row_size;
        for (i, value) in field_values.iter().enumerate() {
            let start = row_start + self.offsets[i];
            let end = start + self.fields[i].byte_width();
            (self.parsers[i])(value, &mut out[start..end])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_size_is_sum_of_column_widths() {
        let schema = RowSchema::new(vec![FieldType::Int64, FieldType::VarChar(16), FieldType::Bool]);
        assert_eq!(schema.row_size(), 8 + 16 + 1);
    }

    #[test]
    fn write_row_places_each_column_at_its_offset() {
        let schema = RowSchema::new(vec![FieldType::Int64, FieldType::Float64]);
        let mut buf = vec![0u8; schema.row_size()];
        schema.write_row(&["42".to_string(), "1.5".to_string()], &mut buf, 0).unwrap();
        assert_eq!(i64::from_le_bytes(buf[0..8].try_into().unwrap()), 42);
        assert_eq!(f64::from_le_bytes(buf[8..16].try_into().unwrap()), 1.5);
    }

    #[test]
    fn varchar_shorter_than_width_is_zero_padded() {
        let schema = RowSchema::new(vec![FieldType::VarChar(8)]);
        let mut buf = vec![0xffu8; 8];
        schema.write_row(&["ab".to_string()], &mut buf, 0).unwrap();
        assert_eq!(&buf, b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn varchar_longer_than_width_is_an_error() {
        let schema = RowSchema::new(vec![FieldType::VarChar(2)]);
        let mut buf = vec![0u8; 2];
        assert!(schema.write_row(&["abc".to_string()], &mut buf, 0).is_err());
    }

    #[test]
    fn wrong_field_count_is_an_error() {
        let schema = RowSchema::new(vec![FieldType::Int64, FieldType::Int64]);
        let mut buf = vec![0u8; schema.row_size()];
        assert!(schema.write_row(&["1".to_string()], &mut buf, 0).is_err());
    }

    #[test]
    fn non_numeric_value_for_numeric_column_is_an_error() {
        let schema = RowSchema::new(vec![FieldType::Int64]);
        let mut buf = vec![0u8; 8];
        assert!(schema.write_row(&["not-a-number".to_string()], &mut buf, 0).is_err());
    }
}
