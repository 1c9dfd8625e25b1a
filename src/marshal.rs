//! Conversion of host label/length arrays into the packed buffers WarpCTC reads.

use log::debug;

use crate::{
    engine::{CtcBatch, CtcEngine, CtcOutput},
    error::CtcError,
};

/// A one dimensional view over `data` with an arbitrary element stride.
#[derive(Clone, Copy, Debug)]
pub struct StridedView<'a, T> {
    data: &'a [T],
    offset: usize,
    len: usize,
    stride: usize,
}

impl<'a, T: Copy> StridedView<'a, T> {
    pub fn new(data: &'a [T], offset: usize, len: usize, stride: usize) -> Result<Self, CtcError> {
        check_extent(data.len(), offset, &[(len, stride)])?;

        Ok(Self {
            data,
            offset,
            len,
            stride,
        })
    }

    pub fn contiguous(data: &'a [T]) -> Self {
        Self {
            data,
            offset: 0,
            len: data.len(),
            stride: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn get(&self, idx: usize) -> Option<T> {
        (idx < self.len).then(|| self.data[self.offset + idx * self.stride])
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let Self {
            data,
            offset,
            len,
            stride,
        } = *self;

        (0..len).map(move |idx| data[offset + idx * stride])
    }
}

/// A two dimensional view over `data`, addressed as
/// `data[offset + row * row_stride + col * col_stride]`.
#[derive(Clone, Copy, Debug)]
pub struct MatrixView<'a, T> {
    data: &'a [T],
    offset: usize,
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
}

impl<'a, T: Copy> MatrixView<'a, T> {
    pub fn new(
        data: &'a [T],
        offset: usize,
        [rows, cols]: [usize; 2],
        [row_stride, col_stride]: [usize; 2],
    ) -> Result<Self, CtcError> {
        check_extent(data.len(), offset, &[(rows, row_stride), (cols, col_stride)])?;

        Ok(Self {
            data,
            offset,
            rows,
            cols,
            row_stride,
            col_stride,
        })
    }

    pub fn row_major(data: &'a [T], rows: usize, cols: usize) -> Result<Self, CtcError> {
        Self::new(data, 0, [rows, cols], [cols, 1])
    }

    pub fn dims(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn row(&self, row: usize) -> StridedView<'a, T> {
        if row >= self.rows {
            return StridedView {
                data: self.data,
                offset: self.offset,
                len: 0,
                stride: self.col_stride,
            };
        }

        StridedView {
            data: self.data,
            offset: self.offset + row * self.row_stride,
            len: self.cols,
            stride: self.col_stride,
        }
    }
}

fn check_extent(len: usize, offset: usize, dims: &[(usize, usize)]) -> Result<(), CtcError> {
    if dims.iter().any(|&(size, _)| size == 0) {
        return Ok(());
    }

    // overflowing extents are out of bounds of any slice
    let extent = dims
        .iter()
        .try_fold(1usize, |extent, &(size, stride)| {
            (size - 1)
                .checked_mul(stride)
                .and_then(|span| extent.checked_add(span))
        })
        .unwrap_or(usize::MAX);

    match offset.checked_add(extent) {
        Some(end) if end <= len => Ok(()),
        _ => Err(CtcError::ViewOutOfBounds {
            offset,
            extent,
            len,
        }),
    }
}

/// Labels of a whole batch, concatenated, with the number of labels per sequence.
///
/// Only built by [`flatten_labels`], so the lengths are non-negative and sum to
/// the number of labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatLabels {
    labels: Vec<i32>,
    lengths: Vec<i32>,
}

impl FlatLabels {
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn lengths(&self) -> &[i32] {
        &self.lengths
    }

    /// Splits the flat buffer back into one slice per sequence.
    pub fn split(&self) -> Vec<&[i32]> {
        let mut start = 0usize;
        self.lengths
            .iter()
            .map(|&len| {
                let end = start + len as usize;
                let row = &self.labels[start..end];
                start = end;
                row
            })
            .collect()
    }
}

/// Flattens a negative-padded label matrix.
///
/// Every non-negative entry is kept, scanning rows in order and each row left
/// to right. The whole row is scanned, so a row whose padding is not a suffix
/// still contributes all of its non-negative entries. Callers are expected to
/// pass left-packed rows; otherwise the flattened sequence will not match the
/// intended label order and nothing here reports it.
pub fn flatten_labels(matrix: MatrixView<'_, i32>) -> FlatLabels {
    let [rows, cols] = matrix.dims();

    // label lengths are unknown before the scan
    let mut labels = Vec::with_capacity(rows * cols);
    let mut lengths = Vec::with_capacity(rows);

    for row in 0..rows {
        let mut count = 0;
        for label in matrix.row(row).iter() {
            if label >= 0 {
                labels.push(label);
                count += 1;
            }
        }
        lengths.push(count);
    }

    debug!(
        "flattened {} labels out of a {}x{} label matrix",
        labels.len(),
        rows,
        cols
    );

    FlatLabels { labels, lengths }
}

/// Copies input lengths into a packed buffer; the native routine ignores strides.
pub fn contiguous_input_lengths(input_lengths: StridedView<'_, i32>) -> Vec<i32> {
    input_lengths.iter().collect()
}

/// Dense host inputs of one CTC call, before marshaling.
#[derive(Clone, Copy, Debug)]
pub struct DenseInputs<'a> {
    /// `[max_time, minibatch, alphabet_size]`, packed.
    pub activations: &'a [f32],
    pub dims: [usize; 3],
    pub labels: MatrixView<'a, i32>,
    pub input_lengths: StridedView<'a, i32>,
}

/// Marshals `inputs` into the packed buffers and runs `engine` once on them.
///
/// The buffers only live for the duration of the call.
pub fn compute<E: CtcEngine>(
    engine: &E,
    inputs: DenseInputs<'_>,
    want_gradients: bool,
) -> Result<CtcOutput, CtcError> {
    let [max_time, minibatch, alphabet_size] = inputs.dims;
    let [label_rows, _] = inputs.labels.dims();

    if label_rows != minibatch {
        return Err(CtcError::ShapeMismatch(format!(
            "batch size of acts ({}) should correspond to rows of labels ({})",
            minibatch, label_rows
        )));
    }
    if inputs.input_lengths.len() != minibatch {
        return Err(CtcError::ShapeMismatch(format!(
            "batch size of acts ({}) should correspond to size of input_lengths ({})",
            minibatch,
            inputs.input_lengths.len()
        )));
    }

    let flat = flatten_labels(inputs.labels);
    let input_lengths = contiguous_input_lengths(inputs.input_lengths);

    let batch = CtcBatch {
        activations: inputs.activations,
        flat_labels: flat.labels(),
        label_lengths: flat.lengths(),
        input_lengths: &input_lengths,
        max_time,
        minibatch,
        alphabet_size,
    };

    engine.compute(&batch, want_gradients)
}
