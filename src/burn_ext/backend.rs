use burn::{
    backend::{
        autodiff::{
            checkpoint::{base::Checkpointer, strategy::CheckpointStrategy},
            grads::Gradients,
            ops::{unary, Backward, Ops, OpsKind},
        },
        ndarray::FloatNdArrayElement,
        Autodiff, NdArray,
    },
    nn::loss::Reduction,
    tensor::{
        ops::{FloatTensor, IntTensor},
        Data, ElementConversion, Shape,
    },
};
#[cfg(feature = "tch")]
use burn::backend::{libtorch::TchElement, LibTorch};

use crate::{
    engine::CtcEngine,
    error::CtcError,
    marshal::{self, DenseInputs, MatrixView, StridedView},
};

/// Runs `engine` on host copies of the tensors and uploads the results back
/// to the activations' device.
fn host_ctc<B: burn::tensor::backend::Backend, E: CtcEngine>(
    acts: FloatTensor<B, 3>,
    labels: IntTensor<B, 2>,
    input_lengths: IntTensor<B, 1>,
    engine: &E,
    want_gradients: bool,
) -> Result<(FloatTensor<B, 1>, Option<FloatTensor<B, 3>>), CtcError> {
    let device = B::float_device(&acts);
    let dims = B::float_shape(&acts).dims;
    let [_, batch_size, _] = dims;
    let [label_rows, max_label_length] = B::int_shape(&labels).dims;

    let acts = B::float_into_data(acts).read().convert::<f32>();
    let labels = B::int_into_data(labels).read().convert::<i32>();
    let input_lengths = B::int_into_data(input_lengths).read().convert::<i32>();

    let output = marshal::compute(
        engine,
        DenseInputs {
            activations: &acts.value,
            dims,
            labels: MatrixView::row_major(&labels.value, label_rows, max_label_length)?,
            input_lengths: StridedView::contiguous(&input_lengths.value),
        },
        want_gradients,
    )?;

    let costs = B::float_from_data(
        Data::new(output.costs, Shape::new([batch_size])).convert(),
        &device,
    );
    let gradients = output.gradients.map(|gradients| {
        B::float_from_data(Data::new(gradients, Shape::new(dims)).convert(), &device)
    });

    Ok((costs, gradients))
}

pub trait Backend: burn::tensor::backend::Backend {
    fn apply_reduction(
        costs: FloatTensor<Self, 1>,
        label_lengths: IntTensor<Self, 1>,
        reduction: Option<Reduction>,
    ) -> FloatTensor<Self, 1> {
        match reduction {
            Some(Reduction::Mean) | Some(Reduction::Auto) => Self::float_mean(Self::float_div(
                costs,
                Self::int_into_float(Self::int_clamp_min(label_lengths, 1.elem())),
            )),
            Some(Reduction::Sum) => Self::float_sum(costs),
            None => costs,
        }
    }

    /// Costs `[batch_size]` and gradients `[seq_length, batch_size, num_classes]`
    /// of the CTC loss for `acts`.
    fn warp_ctc<E: CtcEngine>(
        acts: FloatTensor<Self, 3>,
        labels: IntTensor<Self, 2>,
        input_lengths: IntTensor<Self, 1>,
        engine: &E,
    ) -> Result<(FloatTensor<Self, 1>, FloatTensor<Self, 3>), CtcError> {
        let (costs, gradients) = host_ctc::<Self, E>(acts, labels, input_lengths, engine, true)?;
        let gradients = gradients.ok_or_else(|| {
            CtcError::InvalidBatch(String::from("engine returned no gradients"))
        })?;

        Ok((costs, gradients))
    }

    fn warp_ctc_costs<E: CtcEngine>(
        acts: FloatTensor<Self, 3>,
        labels: IntTensor<Self, 2>,
        input_lengths: IntTensor<Self, 1>,
        engine: &E,
    ) -> Result<FloatTensor<Self, 1>, CtcError> {
        host_ctc::<Self, E>(acts, labels, input_lengths, engine, false).map(|(costs, _)| costs)
    }

    /// The loss as seen by autodiff. Backends without gradient tracking only
    /// need the costs.
    fn warp_ctc_loss<E: CtcEngine>(
        acts: FloatTensor<Self, 3>,
        labels: IntTensor<Self, 2>,
        input_lengths: IntTensor<Self, 1>,
        engine: &E,
    ) -> Result<FloatTensor<Self, 1>, CtcError> {
        Self::warp_ctc_costs(acts, labels, input_lengths, engine)
    }
}

impl<E: FloatNdArrayElement> Backend for NdArray<E> {}

#[cfg(feature = "tch")]
impl<E: TchElement> Backend for LibTorch<E> {}

impl<B: Backend, C: CheckpointStrategy> Backend for Autodiff<B, C> {
    fn warp_ctc_loss<E: CtcEngine>(
        acts: FloatTensor<Self, 3>,
        labels: IntTensor<Self, 2>,
        input_lengths: IntTensor<Self, 1>,
        engine: &E,
    ) -> Result<FloatTensor<Self, 1>, CtcError> {
        #[derive(Debug)]
        struct WarpCtcBackward;

        impl<B: Backend> Backward<B, 1, 1> for WarpCtcBackward {
            // gradients of every cost w.r.t. the activations
            type State = B::FloatTensorPrimitive<3>;

            fn backward(
                self,
                ops: Ops<Self::State, 1>,
                grads: &mut Gradients,
                _checkpointer: &mut Checkpointer,
            ) {
                let gradients = ops.state;

                unary::<B, 1, 3, _>(ops.parents, ops.node, grads, |grad| {
                    let [batch_size] = B::float_shape(&grad).dims;

                    B::float_mul(
                        gradients,
                        B::float_reshape(grad, Shape::from([1, batch_size, 1])),
                    )
                });
            }
        }

        match WarpCtcBackward
            .prepare::<C>([acts.node.clone()])
            .compute_bound()
            .stateful()
        {
            OpsKind::Tracked(prep) => {
                let (costs, gradients) =
                    B::warp_ctc(acts.primitive, labels, input_lengths, engine)?;
                Ok(prep.finish(gradients, costs))
            }
            OpsKind::UnTracked(prep) => {
                let costs = B::warp_ctc_costs(acts.primitive, labels, input_lengths, engine)?;
                Ok(prep.finish(costs))
            }
        }
    }
}
