use tensorsync::tensor::decode;
use tensorsync::{
    ErrorKind, GatherLayout, HostTensor, Response, TensorEntry, TensorShape, TensorSyncError,
};

use super::helpers::{entry_without_output, run_collective};

/// `rows x width` tensor whose values encode `(rank, row, col)`.
fn rank_rows(rank: u32, rows: usize, width: usize) -> HostTensor {
    let values: Vec<i32> = (0..rows * width)
        .map(|i| (rank as i32) * 1000 + i as i32)
        .collect();
    HostTensor::from_slice(&values, TensorShape::new([rows, width])).unwrap()
}

fn output_of(e: &TensorEntry) -> (Vec<usize>, Vec<i32>) {
    let out = e.output().unwrap();
    (out.shape().as_slice().to_vec(), decode(out.data()))
}

#[test]
fn test_two_ranks_uneven_rows() {
    let sizes = [2usize, 3];
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();
        let input = rank_rows(rank, sizes[rank as usize], 4);
        let mut entries = vec![entry_without_output("x", input)];
        m.execute_operation(
            &mut entries,
            &Response::allgather(vec!["x".into()], sizes.to_vec()),
        )
        .unwrap();
        output_of(&entries[0])
    });

    let mut expected: Vec<i32> = (0..8).collect();
    expected.extend((0..12).map(|i| 1000 + i));
    for (rank, (shape, values)) in outputs.iter().enumerate() {
        assert_eq!(shape, &vec![5, 4], "rank {rank}");
        assert_eq!(values, &expected, "rank {rank}");
        // Rows 0..2 came from rank 0, rows 2..5 from rank 1.
        assert!(values[..8].iter().all(|v| *v < 1000));
        assert!(values[8..].iter().all(|v| *v >= 1000));
    }
}

#[test]
fn test_layout_invariants_for_fused_batch() {
    // Three entries over three ranks, including a rank with no rows.
    let slice_elements = [4usize, 1, 6];
    let tensor_sizes = [2usize, 0, 5, 1, 1, 1, 3, 2, 0];
    let world = 3;
    let layout = GatherLayout::compute(&slice_elements, &tensor_sizes, world).unwrap();

    assert_eq!(layout.displacements()[0], 0);
    for r in 1..world {
        assert_eq!(
            layout.displacements()[r],
            layout.displacements()[r - 1] + layout.recvcounts()[r - 1]
        );
    }
    for r in 0..world {
        let sum: usize = (0..slice_elements.len())
            .map(|e| layout.component_size(e, r))
            .sum();
        assert_eq!(layout.recvcounts()[r], sum, "rank {r}");
        assert_eq!(layout.component_offset(0, r), 0);
        for e in 1..slice_elements.len() {
            assert_eq!(
                layout.component_offset(e, r),
                layout.component_offset(e - 1, r) + layout.component_size(e - 1, r)
            );
        }
    }
    for (e, &slice) in slice_elements.iter().enumerate() {
        let rows: usize = tensor_sizes[e * world..(e + 1) * world].iter().sum();
        assert_eq!(layout.output_first_dim(e), rows);
        for r in 0..world {
            assert_eq!(
                layout.component_size(e, r),
                tensor_sizes[e * world + r] * slice
            );
        }
    }
    assert_eq!(layout.total_len(), layout.recvcounts().iter().sum::<usize>());
}

#[test]
fn test_fused_batch_matches_individual_gathers() {
    // Per entry: rows contributed by each of 3 ranks, and row width.
    let rows = [[1usize, 2, 0], [3, 0, 1], [2, 2, 2]];
    let widths = [3usize, 1, 2];
    let tensor_sizes: Vec<usize> = rows.iter().flatten().copied().collect();

    let make_entries = |rank: u32| -> Vec<TensorEntry> {
        (0..3)
            .map(|e| {
                let input = rank_rows(rank, rows[e][rank as usize], widths[e]);
                entry_without_output(&format!("t{e}"), input)
            })
            .collect()
    };

    let fused = run_collective(3, |m| {
        let mut entries = make_entries(m.state().rank());
        m.execute_operation(
            &mut entries,
            &Response::allgather(vec![], tensor_sizes.clone()),
        )
        .unwrap();
        entries.iter().map(output_of).collect::<Vec<_>>()
    });

    let individual = run_collective(3, |m| {
        make_entries(m.state().rank())
            .into_iter()
            .enumerate()
            .map(|(e, entry)| {
                let mut batch = vec![entry];
                m.execute_operation(
                    &mut batch,
                    &Response::allgather(vec![], rows[e].to_vec()),
                )
                .unwrap();
                output_of(&batch[0])
            })
            .collect::<Vec<_>>()
    });

    assert_eq!(fused, individual);
    for per_rank in &fused {
        assert_eq!(per_rank[0].0, vec![3, 3]);
        assert_eq!(per_rank[1].0, vec![4, 1]);
        assert_eq!(per_rank[2].0, vec![6, 2]);
        // Entry 1: three rows from rank 0, then one from rank 2.
        assert_eq!(per_rank[1].1, vec![0, 1, 2, 2000]);
    }
}

#[test]
fn test_rank_with_zero_rows() {
    let sizes = vec![0usize, 2];
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();
        let input = rank_rows(rank, sizes[rank as usize], 3);
        let mut entries = vec![entry_without_output("sparse", input)];
        m.execute_operation(&mut entries, &Response::allgather(vec![], sizes.clone()))
            .unwrap();
        output_of(&entries[0])
    });
    for (shape, values) in outputs {
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(values, vec![1000, 1001, 1002, 1003, 1004, 1005]);
    }
}

#[test]
fn test_incomplete_size_table_rejected() {
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();
        let mut entries = vec![entry_without_output("x", rank_rows(rank, 1, 2))];
        let err = m
            .execute_operation(&mut entries, &Response::allgather(vec![], vec![1]))
            .unwrap_err();
        (err.kind(), entries[0].output().is_none())
    });
    for (kind, no_output) in outputs {
        assert_eq!(kind, ErrorKind::InvalidArgument);
        assert!(no_output);
    }
}

#[test]
fn test_scalar_slices_gather_vectors() {
    let sizes = vec![3usize, 1, 2];
    let outputs = run_collective(3, |m| {
        let rank = m.state().rank();
        let n = sizes[rank as usize];
        let input = HostTensor::from_vec(vec![rank as f64; n]);
        let mut entries = vec![entry_without_output("v", input)];
        m.execute_operation(&mut entries, &Response::allgather(vec![], sizes.clone()))
            .unwrap();
        let out = entries[0].output().unwrap();
        (out.shape().as_slice().to_vec(), decode::<f64>(out.data()))
    });
    for (shape, values) in outputs {
        assert_eq!(shape, vec![6]);
        assert_eq!(values, vec![0.0, 0.0, 0.0, 1.0, 2.0, 2.0]);
    }
}

#[test]
fn test_rank_with_wrong_input_size_fails_every_rank() {
    let sizes = vec![2usize, 2];
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();
        // Rank 1 holds three rows although the coordinator announced two.
        let rows = if rank == 1 { 3 } else { 2 };
        let mut entries = vec![entry_without_output("x", rank_rows(rank, rows, 2))];
        m.execute_operation(&mut entries, &Response::allgather(vec![], sizes.clone()))
            .unwrap_err()
    });
    assert!(matches!(
        outputs[0],
        TensorSyncError::CollectiveFailed { rank: 1, .. }
    ));
    assert_eq!(outputs[1].kind(), ErrorKind::InvalidArgument);
}
