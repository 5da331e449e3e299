use tensorsync::tensor::{decode, encode};
use tensorsync::{ErrorKind, HostTensor, Response, TensorSyncError};

use super::helpers::{entry_with_output, entry_without_output, run_collective};

#[test]
fn test_root_1_of_3_reaches_every_rank() {
    let outputs = run_collective(3, |m| {
        let rank = m.state().rank();
        let input = if rank == 1 {
            HostTensor::from_vec(vec![1i32, 2, 3])
        } else {
            HostTensor::from_vec(vec![-1i32, -1, -1])
        };
        let mut entry = entry_with_output("b", input);
        // Sentinel so a missed write is visible.
        entry
            .output_mut()
            .unwrap()
            .data_mut()
            .copy_from_slice(&encode(&[99i32, 99, 99]));
        let mut entries = vec![entry.with_root_rank(1)];
        m.execute_operation(&mut entries, &Response::broadcast("b"))
            .unwrap();
        (
            decode::<i32>(entries[0].output().unwrap().data()),
            decode::<i32>(entries[0].tensor.data()),
        )
    });

    for (rank, (output, input)) in outputs.iter().enumerate() {
        assert_eq!(output, &vec![1, 2, 3], "rank {rank}");
        if rank == 1 {
            assert_eq!(input, &vec![1, 2, 3], "root input must be unchanged");
        }
    }
}

#[test]
fn test_root_0_f64() {
    let outputs = run_collective(4, |m| {
        let rank = m.state().rank();
        let input = HostTensor::from_vec(vec![rank as f64 + 0.5; 5]);
        let mut entries = vec![entry_with_output("w", input)];
        m.execute_operation(&mut entries, &Response::broadcast("w"))
            .unwrap();
        decode::<f64>(entries[0].output().unwrap().data())
    });
    for out in outputs {
        assert_eq!(out, vec![0.5; 5]);
    }
}

#[test]
fn test_batches_are_rejected() {
    let outputs = run_collective(1, |m| {
        let mut entries = vec![
            entry_with_output("a", HostTensor::from_vec(vec![1u8])),
            entry_with_output("b", HostTensor::from_vec(vec![2u8])),
        ];
        m.execute_operation(&mut entries, &Response::broadcast("a"))
            .unwrap_err()
    });
    assert_eq!(
        outputs[0],
        TensorSyncError::InvalidBatch {
            operation: "broadcast",
            expected: 1,
            actual: 2
        }
    );
    assert_eq!(outputs[0].kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_rank_without_output_does_not_poison_next_broadcast() {
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();

        let first = HostTensor::from_vec(vec![1i32, 2, 3]);
        let mut round1 = if rank == 0 {
            vec![entry_with_output("b", first)]
        } else {
            vec![entry_without_output("b", first)]
        };
        let status1 = m.execute_operation(&mut round1, &Response::broadcast("b"));

        let second = if rank == 0 {
            HostTensor::from_vec(vec![7i32, 8, 9])
        } else {
            HostTensor::from_vec(vec![0i32, 0, 0])
        };
        let mut round2 = vec![entry_with_output("b", second)];
        let status2 = m.execute_operation(&mut round2, &Response::broadcast("b"));
        let out = decode::<i32>(round2[0].output().unwrap().data());
        (status1, status2, out)
    });

    let (status1, status2, out) = &outputs[0];
    assert!(status1.is_ok());
    assert!(status2.is_ok());
    assert_eq!(out, &vec![7, 8, 9]);

    let (status1, status2, out) = &outputs[1];
    assert_eq!(
        status1,
        &Err(TensorSyncError::MissingOutput { name: "b".into() })
    );
    assert!(status2.is_ok(), "{status2:?}");
    assert_eq!(out, &vec![7, 8, 9]);
}

#[test]
fn test_wrong_output_size_on_receiver() {
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();
        let input = HostTensor::from_vec(vec![1.0f32, 2.0]);
        let mut entry = entry_with_output("b", input);
        if rank == 1 {
            entry = entry.with_output(Box::new(HostTensor::from_vec(vec![0.0f32; 3])));
        }
        let mut entries = vec![entry];
        m.execute_operation(&mut entries, &Response::broadcast("b"))
    });
    assert!(outputs[0].is_ok());
    assert_eq!(
        outputs[1],
        Err(TensorSyncError::BufferSizeMismatch {
            expected: 8,
            actual: 12
        })
    );
}
