use burn::tensor::backend::Backend as BackendTrait;
use burn::tensor::{Distribution, Int, Tensor, TensorData};
use burn_ndarray::NdArray;
use burn_vit::{PatchGrid, ShapeError, patchify, patchify_flat, unflatten, unpatchify};

type Backend = NdArray<f32>;

fn device() -> <Backend as BackendTrait>::Device {
    Default::default()
}

fn ramp(dims: [usize; 4]) -> Tensor<Backend, 4> {
    let total = dims.iter().product::<usize>() as i64;
    Tensor::<Backend, 1, Int>::arange(0..total, &device())
        .float()
        .reshape(dims)
}

fn values<const D: usize>(tensor: Tensor<Backend, D>) -> Vec<f32> {
    tensor
        .into_data()
        .convert::<f32>()
        .into_vec::<f32>()
        .expect("f32 data")
}

#[test]
fn patch_count_matches_grid_for_divisible_shapes() {
    for (batch, channels, height, width, patch) in [
        (1, 1, 4, 4, 1),
        (2, 3, 32, 32, 4),
        (3, 2, 12, 8, 4),
        (1, 3, 16, 48, 8),
        (2, 1, 6, 9, 3),
    ] {
        let images = Tensor::<Backend, 4>::random(
            [batch, channels, height, width],
            Distribution::Default,
            &device(),
        );
        let grid = patchify(images.clone(), patch).expect("grid form");
        let expected_patches = (height / patch) * (width / patch);
        assert_eq!(grid.dims(), [batch, expected_patches, channels, patch, patch]);

        let flat = patchify_flat(images, patch).expect("feature form");
        assert_eq!(
            flat.dims(),
            [batch, expected_patches, channels * patch * patch]
        );
    }
}

#[test]
fn cifar_sized_batch_shapes() {
    let images = Tensor::<Backend, 4>::zeros([2, 3, 32, 32], &device());
    assert_eq!(patchify(images.clone(), 4).unwrap().dims(), [2, 64, 3, 4, 4]);
    assert_eq!(patchify_flat(images, 4).unwrap().dims(), [2, 64, 48]);
}

#[test]
fn reassembling_patches_reproduces_input() {
    let images =
        Tensor::<Backend, 4>::random([2, 3, 12, 16], Distribution::Default, &device());
    let grid = PatchGrid::from_dims(&images.dims(), 4).expect("grid");

    let restored = unpatchify(patchify(images.clone(), 4).unwrap(), &grid).unwrap();
    assert_eq!(values(restored), values(images.clone()));

    let flat = patchify_flat(images.clone(), 4).unwrap();
    let restored = unpatchify(unflatten(flat, &grid).unwrap(), &grid).unwrap();
    assert_eq!(values(restored), values(images));
}

#[test]
fn patch_indices_are_row_major() {
    // One channel, 8 x 12 image, 4 x 4 patches => 2 rows x 3 cols.
    let (height, width, patch) = (8, 12, 4);
    let images = ramp([1, 1, height, width]);
    let patches = patchify(images, patch).unwrap();

    let block = |row: usize, col: usize| -> Vec<f32> {
        let mut out = Vec::new();
        for y in row * patch..(row + 1) * patch {
            for x in col * patch..(col + 1) * patch {
                out.push((y * width + x) as f32);
            }
        }
        out
    };

    let cols = width / patch;
    let first = patches.clone().slice_dim(1, 0..1);
    assert_eq!(values(first), block(0, 0));

    let second_row = patches.clone().slice_dim(1, cols..cols + 1);
    assert_eq!(values(second_row), block(1, 0));

    let last = patches.slice_dim(1, 5..6);
    assert_eq!(values(last), block(1, 2));
}

#[test]
fn single_patch_equals_flattened_image() {
    let images = Tensor::<Backend, 4>::random([2, 3, 8, 8], Distribution::Default, &device());
    let flat = patchify_flat(images.clone(), 8).unwrap();
    assert_eq!(flat.dims(), [2, 1, 192]);
    assert_eq!(values(flat), values(images));
}

#[test]
fn indivisible_height_is_a_shape_error() {
    let images = Tensor::<Backend, 4>::zeros([1, 3, 30, 32], &device());
    let err = patchify_flat(images, 4).unwrap_err();
    assert_eq!(
        err,
        ShapeError::NotDivisible {
            axis: "height",
            extent: 30,
            patch_size: 4,
        }
    );
}

#[test]
fn runtime_shapes_must_have_four_axes() {
    let data = TensorData::new(vec![0.0f32; 3 * 32 * 32], [3, 32, 32]);
    let err = PatchGrid::from_dims(&data.shape, 4).unwrap_err();
    assert_eq!(
        err,
        ShapeError::Rank {
            expected: 4,
            actual: 3,
        }
    );
    assert!(err.to_string().contains("4 axes"));
}
