//! The CTC cost as a graph node: typed inputs are checked when the node is
//! built, forward evaluates costs and gradients in one engine call, and the
//! gradients are handed back as an explicit state consumed by the backward step.

use core::fmt;

use burn::tensor::{backend::Backend, Data, Shape, Tensor};

use crate::{
    engine::CtcEngine,
    error::CtcError,
    marshal::{self, DenseInputs, MatrixView, StridedView},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    F64,
    F32,
    I64,
    I32,
    Bool,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F64 => "float64",
            DType::F32 => "float32",
            DType::I64 => "int64",
            DType::I32 => "int32",
            DType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Inputs of a CTC node, in node input order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeInput {
    Activations,
    InputLengths,
    Labels,
}

impl NodeInput {
    pub const ALL: [NodeInput; 3] = [
        NodeInput::Activations,
        NodeInput::InputLengths,
        NodeInput::Labels,
    ];

    pub fn position(self) -> usize {
        match self {
            NodeInput::Activations => 0,
            NodeInput::InputLengths => 1,
            NodeInput::Labels => 2,
        }
    }
}

impl fmt::Display for NodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeInput::Activations => "acts",
            NodeInput::InputLengths => "input_lengths",
            NodeInput::Labels => "labels",
        };
        f.write_str(name)
    }
}

/// Host data tagged with its element type.
#[derive(Clone, Debug)]
pub enum HostData<const D: usize> {
    F64(Data<f64, D>),
    F32(Data<f32, D>),
    I64(Data<i64, D>),
    I32(Data<i32, D>),
    Bool(Data<bool, D>),
}

impl<const D: usize> HostData<D> {
    pub fn dtype(&self) -> DType {
        match self {
            HostData::F64(_) => DType::F64,
            HostData::F32(_) => DType::F32,
            HostData::I64(_) => DType::I64,
            HostData::I32(_) => DType::I32,
            HostData::Bool(_) => DType::Bool,
        }
    }

    pub fn dims(&self) -> [usize; D] {
        match self {
            HostData::F64(data) => data.shape.dims,
            HostData::F32(data) => data.shape.dims,
            HostData::I64(data) => data.shape.dims,
            HostData::I32(data) => data.shape.dims,
            HostData::Bool(data) => data.shape.dims,
        }
    }

    fn into_f32(self, input: NodeInput) -> Result<Data<f32, D>, CtcError> {
        match self {
            HostData::F32(data) => Ok(data),
            other => Err(CtcError::TypeMismatch {
                input,
                expected: DType::F32,
                found: other.dtype(),
            }),
        }
    }

    fn into_i32(self, input: NodeInput) -> Result<Data<i32, D>, CtcError> {
        match self {
            HostData::I32(data) => Ok(data),
            other => Err(CtcError::TypeMismatch {
                input,
                expected: DType::I32,
                found: other.dtype(),
            }),
        }
    }
}

macro_rules! host_data_from {
    ($($elem:ty => $variant:ident),*) => {
        $(
            impl<const D: usize> From<Data<$elem, D>> for HostData<D> {
                fn from(data: Data<$elem, D>) -> Self {
                    HostData::$variant(data)
                }
            }
        )*
    };
}

host_data_from!(f64 => F64, f32 => F32, i64 => I64, i32 => I32, bool => Bool);

/// The CTC operator before any node is built.
#[derive(Clone, Debug, Default)]
pub struct WarpCtcOp<E: CtcEngine> {
    engine: E,
}

impl<E: CtcEngine> WarpCtcOp<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Builds a node from `acts` (`[seq_length, batch_size, num_classes]`),
    /// `labels` (`[batch_size, max_label_length]`, negative padded) and
    /// optional `input_lengths` (`[batch_size]`).
    ///
    /// Without `input_lengths` every sequence is assumed to span all of
    /// `seq_length`.
    pub fn make_node<B: Backend>(
        &self,
        acts: HostData<3>,
        labels: HostData<2>,
        input_lengths: Option<HostData<1>>,
        device: &B::Device,
    ) -> Result<CtcNode<B>, CtcError> {
        let [seq_length, batch_size, _] = acts.dims();
        let input_lengths = input_lengths.unwrap_or_else(|| {
            HostData::I32(Data::new(
                vec![seq_length as i32; batch_size],
                Shape::new([batch_size]),
            ))
        });

        let acts = acts.into_f32(NodeInput::Activations)?;
        let labels = labels.into_i32(NodeInput::Labels)?;
        let input_lengths = input_lengths.into_i32(NodeInput::InputLengths)?;

        Ok(CtcNode {
            acts,
            input_lengths,
            labels,
            device: device.clone(),
        })
    }

    /// Evaluates the node: one engine call yields both outputs.
    pub fn forward<B: Backend>(&self, node: CtcNode<B>) -> Result<CtcForward<B>, CtcError> {
        let dims = node.acts.shape.dims;
        let [seq_length, batch_size, num_classes] = dims;
        let [label_rows, max_label_length] = node.labels.shape.dims;

        let output = marshal::compute(
            &self.engine,
            DenseInputs {
                activations: &node.acts.value,
                dims,
                labels: MatrixView::row_major(&node.labels.value, label_rows, max_label_length)?,
                input_lengths: StridedView::contiguous(&node.input_lengths.value),
            },
            true,
        )?;

        let gradients = output.gradients.ok_or_else(|| {
            CtcError::InvalidBatch(String::from("engine returned no gradients"))
        })?;

        let costs = Tensor::from_data(
            Data::new(output.costs, Shape::new([batch_size])).convert::<B::FloatElem>(),
            &node.device,
        );
        let gradients = Tensor::from_data(
            Data::new(gradients, Shape::new([seq_length, batch_size, num_classes]))
                .convert::<B::FloatElem>(),
            &node.device,
        );

        Ok(CtcForward {
            costs,
            state: CtcGradState { gradients },
        })
    }
}

/// A built node holding its checked inputs.
#[derive(Clone, Debug)]
pub struct CtcNode<B: Backend> {
    acts: Data<f32, 3>,
    input_lengths: Data<i32, 1>,
    labels: Data<i32, 2>,
    device: B::Device,
}

impl<B: Backend> CtcNode<B> {
    pub fn acts_dims(&self) -> [usize; 3] {
        self.acts.shape.dims
    }

    pub fn input_lengths(&self) -> &[i32] {
        &self.input_lengths.value
    }

    pub fn labels(&self) -> &Data<i32, 2> {
        &self.labels
    }
}

/// Outputs of an evaluated node.
#[derive(Clone, Debug)]
pub struct CtcForward<B: Backend> {
    /// One cost per sequence, the node's default output.
    pub costs: Tensor<B, 1>,
    pub state: CtcGradState<B>,
}

/// Gradients of the costs with respect to the activations, kept from the
/// forward pass for the backward pass.
#[derive(Clone, Debug)]
pub struct CtcGradState<B: Backend> {
    gradients: Tensor<B, 3>,
}

impl<B: Backend> CtcGradState<B> {
    pub fn gradients(&self) -> &Tensor<B, 3> {
        &self.gradients
    }

    /// Gradient of the node with respect to `wrt`, given the gradient of the
    /// loss with respect to each sequence cost (`[batch_size]`).
    pub fn grad(self, output_grad: Tensor<B, 1>, wrt: NodeInput) -> Result<Tensor<B, 3>, CtcError> {
        match wrt {
            NodeInput::Activations => self.acts_grad(output_grad),
            input => Err(unsupported(input)),
        }
    }

    /// Gradients for every input, in node input order.
    pub fn grads(self, output_grad: Tensor<B, 1>) -> [Result<Tensor<B, 3>, CtcError>; 3] {
        [
            self.acts_grad(output_grad),
            Err(unsupported(NodeInput::InputLengths)),
            Err(unsupported(NodeInput::Labels)),
        ]
    }

    fn acts_grad(self, output_grad: Tensor<B, 1>) -> Result<Tensor<B, 3>, CtcError> {
        let [_, batch_size, _] = self.gradients.dims();
        let [grad_size] = output_grad.dims();

        if grad_size != batch_size {
            return Err(CtcError::ShapeMismatch(format!(
                "output gradient has {} entries for a batch of {}",
                grad_size, batch_size
            )));
        }

        let output_grad = output_grad.reshape([1, batch_size, 1]);

        Ok(Tensor::from_primitive(B::float_mul(
            self.gradients.into_primitive(),
            output_grad.into_primitive(),
        )))
    }
}

fn unsupported(input: NodeInput) -> CtcError {
    CtcError::UnsupportedGradient {
        position: input.position(),
        input,
    }
}
