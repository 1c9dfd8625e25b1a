use core::marker::PhantomData;

use burn::{
    nn::loss::Reduction,
    tensor::{ElementConversion, Int, Tensor},
};

use super::backend::Backend;
use crate::{engine::CtcEngine, error::CtcError};

/// The Connectionist Temporal Classification loss, computed by a WarpCTC
/// style engine.
#[derive(Clone, Debug)]
pub struct WarpCtcLoss<B: Backend, E: CtcEngine> {
    engine: E,
    backend: PhantomData<B>,
}

impl<B: Backend, E: CtcEngine + Default> Default for WarpCtcLoss<B, E> {
    fn default() -> Self {
        WarpCtcLoss::new(E::default())
    }
}

impl<B: Backend, E: CtcEngine> WarpCtcLoss<B, E> {
    /// Create the criterion.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            backend: PhantomData,
        }
    }

    /// Compute the criterion on the input tensor.
    ///
    /// # Parameters:
    ///
    /// - acts: The unnormalized outputs; softmax is applied by the engine.
    ///   Shape: `[seq_length, batch_size, num_classes]`
    /// - labels: One label sequence per row, left-packed with class
    ///   indices and padded with a negative value. Shape:
    ///   `[batch_size, max_label_length]`
    /// - input_lengths: The valid length of each sequence. Defaults to
    ///   `seq_length` for every sequence. Shape: `[batch_size]`
    /// - reduction: Specifies the reduction to apply to the output. None:
    ///   no reduction will be applied; Some(Reduction::Mean): the output
    ///   losses will be divided by the label lengths and then the mean
    ///   over the batch is taken; Some(Reduction::Sum): the output losses
    ///   will be summed.
    ///
    /// # Reference
    ///
    /// - [warp-ctc](https://github.com/baidu-research/warp-ctc)
    pub fn forward(
        &self,
        acts: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        input_lengths: Option<Tensor<B, 1, Int>>,
        reduction: Option<Reduction>,
    ) -> Result<Tensor<B, 1>, CtcError> {
        let [seq_length, batch_size, _] = acts.dims();
        let input_lengths = input_lengths
            .unwrap_or_else(|| Tensor::full([batch_size], seq_length as i32, &acts.device()));

        Self::assertions(acts.clone(), labels.clone(), input_lengths.clone())?;

        let label_lengths = labels
            .clone()
            .greater_equal_elem(0)
            .int()
            .sum_dim(1)
            .reshape([batch_size]);

        let loss = B::warp_ctc_loss(
            acts.into_primitive(),
            labels.into_primitive(),
            input_lengths.into_primitive(),
            &self.engine,
        )?;
        let loss = B::apply_reduction(loss, label_lengths.into_primitive(), reduction);

        Ok(Tensor::from_primitive(loss))
    }

    fn assertions(
        acts: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        input_lengths: Tensor<B, 1, Int>,
    ) -> Result<(), CtcError> {
        let [input_seq_length, acts_batch_size, _] = acts.dims();
        let [labels_batch_size, _] = labels.dims();
        let [input_lengths_size] = input_lengths.dims();

        if acts_batch_size != input_lengths_size {
            return Err(CtcError::ShapeMismatch(format!(
                "Batch size of acts ({}) should correspond to size of input_lengths ({}).",
                acts_batch_size, input_lengths_size
            )));
        }

        if acts_batch_size != labels_batch_size {
            return Err(CtcError::ShapeMismatch(format!(
                "Batch size of acts ({}) should correspond to rows of labels ({}).",
                acts_batch_size, labels_batch_size
            )));
        }

        if input_lengths_size == 0 {
            return Ok(());
        }

        let max_input_length = input_lengths.max().into_scalar().elem::<i64>();
        if max_input_length > input_seq_length as i64 {
            return Err(CtcError::ShapeMismatch(format!(
                "The maximum value of input_lengths ({}) must not be greater than the sequence length of acts ({}).",
                max_input_length, input_seq_length
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {

    use burn::{
        backend::{Autodiff, NdArray},
        tensor::Data,
    };

    use super::*;
    use crate::engine::ReferenceCtc;

    type TestBackend = Autodiff<NdArray>;

    fn criterion() -> WarpCtcLoss<TestBackend, ReferenceCtc> {
        WarpCtcLoss::default()
    }

    #[test]
    fn test_warp_ctc_loss() {
        let device = Default::default();

        let input = Tensor::<TestBackend, 3>::from_data(
            [
                [[-0.785, -3.471, -2.531, -3.948, -2.373, -3.042, -2.029, -2.255, -4.228, -3.810]],
                [[-3.548, -1.692, -0.967, -2.519, -2.806, -2.760, -2.434, -2.762, -3.638, -3.669]],
                [[-3.904, -1.799, -1.312, -2.530, -2.267, -3.169, -3.838, -2.073, -2.484, -2.418]],
                [[-0.890, -2.506, -3.405, -3.038, -2.483, -2.861, -2.749, -3.086, -1.960, -3.336]],
                [[-1.113, -3.557, -2.580, -1.465, -3.884, -1.993, -3.574, -3.466, -2.669, -2.985]],
                [[-3.948, -0.828, -1.805, -2.842, -2.767, -3.891, -2.825, -1.783, -5.566, -5.072]],
                [[-1.677, -1.703, -4.191, -3.862, -1.726, -2.616, -2.366, -2.324, -2.767, -2.418]],
                [[-1.511, -1.125, -3.526, -3.007, -2.975, -3.358, -2.037, -2.093, -4.137, -3.900]],
                [[-1.850, -2.767, -1.718, -2.185, -2.890, -1.998, -3.661, -3.997, -2.738, -1.671]],
                [[-2.621, -1.234, -3.499, -3.494, -1.612, -1.713, -2.179, -2.884, -4.122, -4.581]],
                [[-1.519, -3.283, -1.287, -3.217, -2.544, -3.128, -2.061, -3.039, -2.388, -3.272]],
                [[-1.112, -1.258, -3.206, -3.103, -3.918, -2.577, -4.399, -4.488, -2.187, -2.663]],
                [[-1.889, -2.344, -3.232, -2.781, -3.312, -0.911, -2.864, -4.825, -3.180, -2.243]],
                [[-4.368, -1.471, -1.308, -2.950, -3.211, -2.692, -1.923, -2.020, -3.859, -3.601]],
                [[-4.254, -3.291, -1.539, -2.622, -2.281, -1.427, -1.712, -3.082, -2.653, -3.809]],
                [[-3.322, -2.904, -0.942, -3.157, -2.987, -3.736, -1.208, -4.155, -4.383, -2.583]],
                [[-2.827, -2.293, -3.109, -3.196, -3.297, -2.451, -2.136, -3.423, -1.012, -2.146]],
                [[-1.803, -1.666, -1.780, -4.024, -3.083, -4.520, -2.674, -2.527, -3.365, -1.516]],
                [[-2.199, -2.340, -2.009, -3.736, -3.363, -2.721, -2.350, -1.951, -1.815, -2.009]],
                [[-1.721, -3.726, -1.701, -3.503, -2.153, -3.242, -2.284, -1.838, -2.646, -2.329]],
                [[-3.655, -2.916, -2.913, -1.197, -3.060, -2.154, -1.776, -3.404, -1.823, -3.310]],
                [[-2.671, -2.592, -2.929, -1.416, -2.007, -2.886, -2.781, -2.597, -1.738, -2.862]],
                [[-1.686, -4.173, -0.884, -5.493, -5.498, -1.707, -3.573, -5.085, -2.060, -3.352]],
                [[-2.114, -2.478, -2.178, -3.457, -3.264, -2.659, -2.653, -1.222, -2.375, -2.475]],
                [[-2.136, -3.563, -2.325, -3.081, -2.035, -3.154, -1.122, -3.486, -1.951, -3.270]],
                [[-3.206, -3.031, -3.913, -2.652, -2.985, -2.635, -1.153, -3.122, -3.256, -1.203]],
                [[-2.104, -1.719, -2.141, -2.695, -2.448, -2.991, -1.542, -2.646, -3.090, -3.066]],
                [[-3.320, -5.098, -1.085, -1.335, -2.588, -3.098, -2.466, -2.951, -3.911, -2.538]],
                [[-3.756, -1.814, -2.752, -2.410, -3.305, -2.387, -2.112, -1.720, -2.616, -1.843]],
                [[-3.985, -2.489, -2.305, -1.454, -2.533, -5.091, -1.759, -2.180, -3.673, -1.779]],
            ],
            &device,
        )
        .require_grad();
        let labels = Tensor::<TestBackend, 2, Int>::from_data([[1, 9, 6, 9, 4]], &device);
        let input_lengths = Tensor::<TestBackend, 1, Int>::from_data([30], &device);
        let expected_res = Data::from([50.3795]);

        let res = criterion()
            .forward(
                input.clone(),
                labels,
                Some(input_lengths),
                Some(Reduction::Sum),
            )
            .unwrap();

        let grads = res.backward();
        let grad = input.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [30, 1, 10]);

        res.to_data().assert_approx_eq(&expected_res, 2);
    }

    #[test]
    fn test_backward_scales_by_upstream_gradient() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device).require_grad();
        let labels = Tensor::<TestBackend, 2, Int>::from_data([[1], [1]], &device);

        let res = criterion()
            .forward(input.clone(), labels, None, None)
            .unwrap();
        let weights = Tensor::<TestBackend, 1>::from_data([1.0, 2.0], &device);
        let grads = (res * weights).sum().backward();
        let grad = input.grad(&grads).unwrap();

        grad.to_data()
            .assert_approx_eq(&Data::from([[[0.5, -0.5], [1.0, -1.0]]]), 5);
    }

    #[test]
    fn test_mean_reduction() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 3>::zeros([2, 2, 3], &device);
        let labels = Tensor::<TestBackend, 2, Int>::from_data([[1, -1], [2, 1]], &device);

        let res = criterion()
            .forward(input, labels, None, Some(Reduction::Mean))
            .unwrap();
        let expected = (-(3.0f32 / 9.0).ln() / 1.0 + -(1.0f32 / 9.0).ln() / 2.0) / 2.0;

        res.to_data().assert_approx_eq(&Data::from([expected]), 4);
    }

    #[test]
    fn test_inner_backend_costs() {
        let device = Default::default();
        let input = Tensor::<NdArray, 3>::zeros([1, 2, 2], &device);
        let labels = Tensor::<NdArray, 2, Int>::from_data([[1], [1]], &device);

        let res = WarpCtcLoss::<NdArray, ReferenceCtc>::default()
            .forward(input, labels, None, None)
            .unwrap();

        let ln2 = core::f32::consts::LN_2;
        res.to_data().assert_approx_eq(&Data::from([ln2, ln2]), 5);
    }

    #[test]
    fn test_shape_errors() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 3>::zeros([3, 2, 4], &device);

        let res = criterion().forward(
            input.clone(),
            Tensor::from_data([[1, 2]], &device),
            None,
            None,
        );
        assert!(matches!(res, Err(CtcError::ShapeMismatch(_))));

        let res = criterion().forward(
            input.clone(),
            Tensor::from_data([[1], [2]], &device),
            Some(Tensor::from_data([3, 4], &device)),
            None,
        );
        assert!(matches!(res, Err(CtcError::ShapeMismatch(_))));

        let res = criterion().forward(
            input,
            Tensor::from_data([[1], [2]], &device),
            Some(Tensor::from_data([3], &device)),
            None,
        );
        assert!(matches!(res, Err(CtcError::ShapeMismatch(_))));
    }
}
