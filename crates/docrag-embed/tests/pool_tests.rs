use candle_core::{DType, Device, Tensor};
use docrag_embed::masked_mean_l2;

#[test]
fn masked_mean_l2_basic() {
    let dev = Device::Cpu;
    // Two tokens with hidden dim 4; second token is masked out.
    let h = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], (1, 2, 4), &dev).unwrap();
    let mask = Tensor::from_slice(&[1i64, 0i64], (1, 2), &dev).unwrap().to_dtype(DType::F32).unwrap();
    let out = masked_mean_l2(&h, &mask).unwrap();
    let v: Vec<Vec<f32>> = out.to_vec2().unwrap();
    let v = &v[0];
    let norm: f32 = (1.0f32 + 4.0 + 9.0 + 16.0).sqrt();
    let expected = [1.0 / norm, 2.0 / norm, 3.0 / norm, 4.0 / norm];
    for (a, b) in v.iter().copied().zip(expected) {
        assert!((a - b).abs() < 1e-5, "a={a} b={b}");
    }
}

#[test]
fn masked_mean_l2_rejects_wrong_rank() {
    let dev = Device::Cpu;
    let h = Tensor::from_slice(&[1.0f32, 2.0], (1, 2), &dev).unwrap();
    let mask = Tensor::from_slice(&[1.0f32, 1.0], (1, 2), &dev).unwrap();
    assert!(masked_mean_l2(&h, &mask).is_err());
}
