//! Arrow export
//!
//! Copies a dataset snapshot into an Arrow [`RecordBatch`]. Scalar numeric
//! columns become primitive arrays, complex elements become
//! `FixedSizeList<2>` of their real/imaginary parts, array cells become
//! `FixedSizeList<element_count>` with the original dimensions recorded in
//! the field's `shape` metadata, and string columns become `Utf8`.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::types::{
    ArrowPrimitiveType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{
    ArrayRef, FixedSizeListArray, Float32Array, Float64Array, PrimitiveArray, RecordBatch,
    RecordBatchOptions, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use tracing::debug;

use crate::column::Column;
use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};
use crate::types::{Complex128, Complex64, Element, TypeTag};

/// Field metadata key holding comma-separated array dimensions.
pub const SHAPE_METADATA_KEY: &str = "shape";

impl Dataset {
    /// Copy every column into a single Arrow record batch.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let rows = self.row_count();
        let mut fields = Vec::with_capacity(self.column_count());
        let mut arrays = Vec::with_capacity(self.column_count());

        for key in self.column_keys() {
            let column = self.column(key)?;
            let (field, array) = self.export_column(column, rows)?;
            fields.push(field);
            arrays.push(array);
        }

        let schema = Arc::new(Schema::new(fields));
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        let batch = RecordBatch::try_new_with_options(schema, arrays, &options)?;
        debug!(
            dataset = self.id(),
            rows,
            columns = batch.num_columns(),
            "exported record batch"
        );
        Ok(batch)
    }

    fn export_column(&self, column: &Column, rows: usize) -> Result<(Field, ArrayRef)> {
        if column.tag().is_string() {
            let values = StringArray::from_iter_values(
                (0..rows).map(|row| self.arena().get(column.slot(row))),
            );
            return Ok((
                Field::new(column.key(), DataType::Utf8, false),
                Arc::new(values),
            ));
        }

        let (element_type, values) = element_values(column, rows)?;
        if column.shape().is_scalar() {
            return Ok((Field::new(column.key(), element_type, false), values));
        }

        let size = list_size(column.element_count())?;
        let item = Arc::new(Field::new("item", element_type, false));
        let list = FixedSizeListArray::try_new(item.clone(), size, values, None)?;
        let dims = column
            .shape()
            .dims()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let field = Field::new(column.key(), DataType::FixedSizeList(item, size), false)
            .with_metadata(HashMap::from([(SHAPE_METADATA_KEY.to_string(), dims)]));
        Ok((field, Arc::new(list)))
    }
}

fn list_size(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| DatasetError::ExportError(format!("list size {len} exceeds i32")))
}

/// Flat element array of a numeric column plus its Arrow element type.
fn element_values(column: &Column, rows: usize) -> Result<(DataType, ArrayRef)> {
    Ok(match column.tag() {
        TypeTag::Int8 => primitive::<Int8Type>(column, rows),
        TypeTag::Int16 => primitive::<Int16Type>(column, rows),
        TypeTag::Int32 => primitive::<Int32Type>(column, rows),
        TypeTag::Int64 => primitive::<Int64Type>(column, rows),
        TypeTag::UInt8 => primitive::<UInt8Type>(column, rows),
        TypeTag::UInt16 => primitive::<UInt16Type>(column, rows),
        TypeTag::UInt32 => primitive::<UInt32Type>(column, rows),
        TypeTag::UInt64 => primitive::<UInt64Type>(column, rows),
        TypeTag::Float32 => primitive::<Float32Type>(column, rows),
        TypeTag::Float64 => primitive::<Float64Type>(column, rows),
        TypeTag::Complex64 => {
            let parts = Float32Array::from_iter_values(
                column
                    .values::<Complex64>(rows)
                    .iter()
                    .flat_map(|c| [c.re, c.im]),
            );
            complex(DataType::Float32, Arc::new(parts))?
        }
        TypeTag::Complex128 => {
            let parts = Float64Array::from_iter_values(
                column
                    .values::<Complex128>(rows)
                    .iter()
                    .flat_map(|c| [c.re, c.im]),
            );
            complex(DataType::Float64, Arc::new(parts))?
        }
        TypeTag::String => {
            return Err(DatasetError::WrongType(format!(
                "column '{}' holds strings",
                column.key()
            )))
        }
    })
}

fn primitive<A>(column: &Column, rows: usize) -> (DataType, ArrayRef)
where
    A: ArrowPrimitiveType,
    A::Native: Element,
{
    let values = column.values::<A::Native>(rows);
    (
        A::DATA_TYPE,
        Arc::new(PrimitiveArray::<A>::from_iter_values(values.iter().copied())),
    )
}

fn complex(part_type: DataType, parts: ArrayRef) -> Result<(DataType, ArrayRef)> {
    let item = Arc::new(Field::new("item", part_type, false));
    let pairs = FixedSizeListArray::try_new(item.clone(), 2, parts, None)?;
    Ok((DataType::FixedSizeList(item, 2), Arc::new(pairs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Array, Int32Array};

    use crate::config::EngineConfig;

    #[test]
    fn test_export_scalars_and_strings() {
        let mut ds = Dataset::new(EngineConfig::default());
        ds.add_column_scalar("uid", TypeTag::Int32).unwrap();
        ds.add_column_scalar("path", TypeTag::String).unwrap();
        ds.add_rows(3).unwrap();
        ds.set_value("uid", 1, 42i32).unwrap();
        ds.set_string("path", 2, "/a/b.mrc").unwrap();

        let batch = ds.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 2);

        let uid = batch.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(uid.values().to_vec(), vec![0, 42, 0]);
        let path = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(path.value(0), "");
        assert_eq!(path.value(2), "/a/b.mrc");
    }

    #[test]
    fn test_export_array_column_has_shape_metadata() {
        let mut ds = Dataset::new(EngineConfig::default());
        ds.add_column_array("m", TypeTag::Float64, &[2, 3]).unwrap();
        ds.add_rows(2).unwrap();
        ds.set_cell("m", 1, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        let batch = ds.to_record_batch().unwrap();
        let field = batch.schema().field(0).clone();
        assert_eq!(field.metadata().get(SHAPE_METADATA_KEY).map(String::as_str), Some("2,3"));

        let list = batch
            .column(0)
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .unwrap();
        assert_eq!(list.value_length(), 6);
        let row = list.value(1);
        let row = row.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(row.values().to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_export_complex_as_pairs() {
        let mut ds = Dataset::new(EngineConfig::default());
        ds.add_column_scalar("z", TypeTag::Complex64).unwrap();
        ds.add_rows(1).unwrap();
        ds.set_value("z", 0, Complex64 { re: 1.5, im: -2.0 }).unwrap();

        let batch = ds.to_record_batch().unwrap();
        let list = batch
            .column(0)
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .unwrap();
        let pair = list.value(0);
        let pair = pair.as_any().downcast_ref::<Float32Array>().unwrap();
        assert_eq!(pair.values().to_vec(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_export_rows_without_columns() {
        let mut ds = Dataset::new(EngineConfig::default());
        ds.add_rows(4).unwrap();
        let batch = ds.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.num_columns(), 0);
    }
}
