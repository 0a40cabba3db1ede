use crate::{EqualSplit, Error, Partition, Partitioner, Raster, RowRange, Weighted};
use serde_json::{Value, json};

fn numbers(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!(i)).collect()
}

fn drain<P: Partitioner>(mut partitioner: P) -> Vec<Partition> {
    std::iter::from_fn(|| partitioner.next()).collect()
}

fn run_equal_split_reconstructs(len: usize, chunks: usize) {
    let data = numbers(len);
    let parts = drain(EqualSplit::new(data.clone(), chunks).unwrap());

    let expected_parts = chunks.min(len);
    assert_eq!(parts.len(), expected_parts, "len={len} chunks={chunks}");

    let size = len / expected_parts;
    let rem = len % expected_parts;
    let mut rebuilt = Vec::with_capacity(len);
    for (i, p) in parts.iter().enumerate() {
        let items = p.part.as_array().unwrap();
        assert_eq!(p.offset, Some(rebuilt.len()));
        if i + 1 == parts.len() {
            assert_eq!(items.len(), size + rem);
        } else {
            assert_eq!(items.len(), size);
        }
        rebuilt.extend(items.iter().cloned());
    }
    assert_eq!(rebuilt, data);
}

#[test]
fn equal_split_reconstructs_input() {
    for len in 1..=17 {
        for chunks in 1..=len {
            run_equal_split_reconstructs(len, chunks);
        }
    }
}

#[test]
fn equal_split_last_part_takes_remainder() {
    let parts = drain(EqualSplit::new(numbers(10), 3).unwrap());
    let shape: Vec<_> = parts
        .iter()
        .map(|p| (p.part.as_array().unwrap().len(), p.offset.unwrap()))
        .collect();
    assert_eq!(shape, vec![(3, 0), (3, 3), (4, 6)]);
}

#[test]
fn equal_split_clamps_chunks_to_length() {
    let parts = drain(EqualSplit::new(numbers(3), 8).unwrap());
    assert_eq!(parts.len(), 3);
    for (i, p) in parts.iter().enumerate() {
        assert_eq!(p.part, json!([i]));
        assert_eq!(p.offset, Some(i));
    }
}

#[test]
fn equal_split_stays_exhausted() {
    let mut split = EqualSplit::new(numbers(4), 2).unwrap();
    assert!(split.next().is_some());
    assert!(split.next().is_some());
    for _ in 0..3 {
        assert!(split.next().is_none());
    }
}

#[test]
fn equal_split_empty_data_is_exhausted() {
    let mut split = EqualSplit::new(Vec::new(), 4).unwrap();
    assert!(split.next().is_none());
}

#[test]
fn equal_split_rejects_zero_chunks() {
    assert!(matches!(
        EqualSplit::new(numbers(3), 0),
        Err(Error::InvalidShard { .. })
    ));
}

#[test]
fn unary_split_yields_bare_elements() {
    let data = vec![json!("a"), json!("b"), json!("c")];
    let parts = drain(EqualSplit::unary(data, 3).unwrap());
    let bare: Vec<_> = parts.into_iter().map(|p| (p.part, p.offset)).collect();
    assert_eq!(
        bare,
        vec![
            (json!("a"), Some(0)),
            (json!("b"), Some(1)),
            (json!("c"), Some(2))
        ]
    );
}

#[test]
fn unary_split_requires_matching_chunks() {
    assert!(matches!(
        EqualSplit::unary(numbers(4), 3),
        Err(Error::InvalidShard { .. })
    ));
    assert!(matches!(
        EqualSplit::unary(numbers(2), 3),
        Err(Error::InvalidShard { .. })
    ));
}

fn weight_of(v: &Value) -> f64 {
    v.as_f64().unwrap()
}

fn run_weighted_is_balanced(weights: &[f64], chunks: usize) {
    let items: Vec<Value> = weights.iter().map(|w| json!(w)).collect();
    let parts = drain(Weighted::new(items, chunks, weight_of).unwrap());
    assert_eq!(parts.len(), chunks.min(weights.len()));

    let mut seen: Vec<f64> = Vec::new();
    let mut sums = Vec::new();
    for (i, p) in parts.iter().enumerate() {
        assert_eq!(p.offset, Some(i));
        let bucket = p.part.as_array().unwrap();
        sums.push(bucket.iter().map(weight_of).sum::<f64>());
        seen.extend(bucket.iter().map(weight_of));
    }

    let mut expected = weights.to_vec();
    expected.sort_by(f64::total_cmp);
    seen.sort_by(f64::total_cmp);
    assert_eq!(seen, expected, "every item lands in exactly one bucket");

    let heaviest = weights.iter().copied().fold(0.0, f64::max);
    let hi = sums.iter().copied().fold(f64::MIN, f64::max);
    let lo = sums.iter().copied().fold(f64::MAX, f64::min);
    assert!(
        hi - lo <= heaviest,
        "bucket sums {sums:?} differ by more than {heaviest}"
    );
}

#[test]
fn weighted_balances_buckets() {
    let one_to_ten: Vec<f64> = (1..=10).map(f64::from).collect();
    run_weighted_is_balanced(&one_to_ten, 3);
    run_weighted_is_balanced(&one_to_ten, 2);
    run_weighted_is_balanced(&[10.0, 10.0, 1.0], 2);
    run_weighted_is_balanced(&[5.0, 1.0, 1.0, 1.0, 1.0, 1.0], 2);
    run_weighted_is_balanced(&[7.0], 4);
}

#[test]
fn weighted_sweeps_back_and_forth() {
    let items: Vec<Value> = (1..=10).map(|w| json!(w)).collect();
    let parts = drain(Weighted::new(items, 3, weight_of).unwrap());
    let buckets: Vec<_> = parts.into_iter().map(|p| p.part).collect();
    assert_eq!(
        buckets,
        vec![json!([10, 5, 4]), json!([9, 6, 3]), json!([8, 7, 2, 1])]
    );
}

#[test]
fn weighted_terminates_on_weightless_items() {
    let items = vec![json!(1), json!(1), json!(0), json!(0)];
    let parts = drain(Weighted::new(items, 2, weight_of).unwrap());
    let total: usize = parts
        .iter()
        .map(|p| p.part.as_array().unwrap().len())
        .sum();
    assert_eq!(total, 4);

    let zeros = vec![json!(0); 3];
    let parts = drain(Weighted::new(zeros, 3, weight_of).unwrap());
    assert!(parts.iter().all(|p| p.part.as_array().unwrap().len() == 1));
}

#[test]
fn weighted_rejects_bad_weights() {
    let items = vec![json!(1), json!(2)];
    assert!(matches!(
        Weighted::new(items.clone(), 2, |_| -1.0),
        Err(Error::InvalidShard { .. })
    ));
    assert!(matches!(
        Weighted::new(items.clone(), 2, |_| f64::NAN),
        Err(Error::InvalidShard { .. })
    ));
    assert!(matches!(
        Weighted::new(items, 0, weight_of),
        Err(Error::InvalidShard { .. })
    ));
}

fn gradient(width: usize, height: usize) -> Raster {
    let mut data = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[y as u8, x as u8, 0, 255]);
        }
    }
    Raster::new(width, height, data).unwrap()
}

#[test]
fn row_range_offsets_are_pixel_indices() {
    let raster = gradient(4, 7);
    let parts = drain(RowRange::new(raster.clone(), 3).unwrap());

    let offsets: Vec<_> = parts.iter().map(|p| p.offset.unwrap()).collect();
    assert_eq!(offsets, vec![0, 8, 16]);

    let heights: Vec<_> = parts
        .iter()
        .map(|p| Raster::try_from(p.part.clone()).unwrap().height)
        .collect();
    assert_eq!(heights, vec![2, 2, 3]);

    let mut rebuilt = Raster::blank(4, 7);
    for p in parts {
        let offset = p.offset.unwrap();
        let band = Raster::try_from(p.part).unwrap();
        rebuilt.put_band(offset, &band).unwrap();
    }
    assert_eq!(rebuilt, raster);
}

#[test]
fn row_range_clamps_to_height() {
    let parts = drain(RowRange::new(gradient(2, 2), 5).unwrap());
    assert_eq!(parts.len(), 2);
}

#[test]
fn raster_validates_buffers() {
    assert!(Raster::new(2, 2, vec![0; 15]).is_err());
    let mut raster = Raster::blank(2, 2);
    assert!(raster.put_band(1, &Raster::blank(2, 1)).is_err());
    assert!(raster.put_band(2, &Raster::blank(2, 2)).is_err());
    assert!(raster.put_band(0, &Raster::blank(3, 1)).is_err());
}
