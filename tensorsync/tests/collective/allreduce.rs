use std::sync::{Arc, Mutex};
use tensorsync::tensor::decode;
use tensorsync::{
    CollectiveBackend, DataType, DeviceId, ErrorKind, HostTensor, OperationManager, Rank,
    Response, RunState, Status, TensorEntry, TensorShape, TensorSyncConfig, TensorSyncError,
    Timeline,
};

use super::helpers::{
    RecordingTimeline, entry_with_output, entry_without_output, run_collective,
    run_collective_with_timeline,
};

fn output_f32(e: &TensorEntry) -> Vec<f32> {
    decode(e.output().unwrap().data())
}

#[test]
fn test_single_entry_single_rank_is_identity() {
    let outputs = run_collective(1, |m| {
        let input = HostTensor::from_vec(vec![0.1f32, -7.25, 3.0e8]);
        let mut entries = vec![entry_with_output("grad", input)];
        m.execute_operation(&mut entries, &Response::allreduce(vec!["grad".into()]))
            .unwrap();
        (
            entries[0].tensor.data().to_vec(),
            entries[0].output().unwrap().data().to_vec(),
        )
    });
    let (input, output) = &outputs[0];
    assert_eq!(input, output, "output must equal input bit for bit");
}

#[test]
fn test_fused_round_trip_sizes_3_1_4() {
    let outputs = run_collective(1, |m| {
        let mut entries = vec![
            entry_with_output("a", HostTensor::from_vec(vec![1i64, 2, 3])),
            entry_with_output("b", HostTensor::from_vec(vec![4i64])),
            entry_with_output("c", HostTensor::from_vec(vec![5i64, 6, 7, 8])),
        ];
        m.execute_operation(&mut entries, &Response::allreduce(vec![]))
            .unwrap();
        entries
            .iter()
            .map(|e| decode::<i64>(e.output().unwrap().data()))
            .collect::<Vec<_>>()
    });
    assert_eq!(outputs[0], vec![vec![1, 2, 3], vec![4], vec![5, 6, 7, 8]]);
}

#[test]
fn test_single_entry_sums_across_4_ranks() {
    let outputs = run_collective(4, |m| {
        let r = m.state().rank() as f32;
        let mut entries = vec![entry_with_output(
            "w",
            HostTensor::from_vec(vec![r, 2.0 * r, 1.0]),
        )];
        m.execute_operation(&mut entries, &Response::allreduce(vec!["w".into()]))
            .unwrap();
        output_f32(&entries[0])
    });
    for (rank, out) in outputs.iter().enumerate() {
        assert_eq!(out, &vec![6.0, 12.0, 4.0], "rank {rank}");
    }
}

#[test]
fn test_fused_batch_sums_each_entry_independently() {
    let outputs = run_collective(3, |m| {
        let r = m.state().rank() as i32;
        let mut entries = vec![
            entry_with_output("a", HostTensor::from_vec(vec![r; 3])),
            entry_with_output("b", HostTensor::from_vec(vec![100 * r])),
            entry_with_output(
                "c",
                HostTensor::from_slice(&[r, r + 1, r + 2, r + 3], TensorShape::new([2, 2]))
                    .unwrap(),
            ),
        ];
        m.execute_operation(&mut entries, &Response::allreduce(vec![]))
            .unwrap();
        entries
            .iter()
            .map(|e| decode::<i32>(e.output().unwrap().data()))
            .collect::<Vec<_>>()
    });
    for (rank, out) in outputs.iter().enumerate() {
        assert_eq!(out[0], vec![3, 3, 3], "rank {rank} entry a");
        assert_eq!(out[1], vec![300], "rank {rank} entry b");
        assert_eq!(out[2], vec![3, 6, 9, 12], "rank {rank} entry c");
    }
}

#[test]
fn test_inputs_are_not_modified() {
    let outputs = run_collective(2, |m| {
        let mut entries = vec![
            entry_with_output("a", HostTensor::from_vec(vec![1.0f64, 2.0])),
            entry_with_output("b", HostTensor::from_vec(vec![3.0f64])),
        ];
        m.execute_operation(&mut entries, &Response::allreduce(vec![]))
            .unwrap();
        entries
            .iter()
            .map(|e| decode::<f64>(e.tensor.data()))
            .collect::<Vec<_>>()
    });
    for out in outputs {
        assert_eq!(out, vec![vec![1.0, 2.0], vec![3.0]]);
    }
}

#[test]
fn test_fused_timeline_phases() {
    let timelines: Vec<Arc<RecordingTimeline>> =
        (0..2).map(|_| Arc::new(RecordingTimeline::default())).collect();
    run_collective_with_timeline(
        2,
        |r| Arc::clone(&timelines[r as usize]) as Arc<dyn Timeline>,
        |m| {
            let mut entries = vec![
                entry_with_output("a", HostTensor::from_vec(vec![1u32])),
                entry_with_output("b", HostTensor::from_vec(vec![2u32])),
            ];
            m.execute_operation(&mut entries, &Response::allreduce(vec![]))
                .unwrap();
        },
    );

    let events = timelines[0].events.lock().unwrap();
    let starts: Vec<&str> = events
        .iter()
        .filter(|e| e.starts_with("start a"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        starts,
        vec![
            "start a MEMCPY_IN_FUSION_BUFFER",
            "start a ALLREDUCE",
            "start a MEMCPY_OUT_FUSION_BUFFER",
        ]
    );
    let started = events.iter().filter(|e| e.starts_with("start")).count();
    let ended = events.iter().filter(|e| e.starts_with("end")).count();
    assert_eq!(started, ended);
}

/// Backend whose every primitive fails.
struct BrokenBackend;

impl CollectiveBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn supports_device(&self, _device: DeviceId) -> bool {
        true
    }

    fn allreduce(
        &self,
        _entries: &[TensorEntry],
        _sendbuf: Option<&[u8]>,
        _recvbuf: &mut [u8],
        _count: usize,
        _dtype: DataType,
    ) -> tensorsync::Result<()> {
        Err(TensorSyncError::CollectiveFailed {
            operation: "allreduce",
            rank: 1,
            reason: "connection reset".into(),
        })
    }

    fn allgatherv(
        &self,
        _entries: &[TensorEntry],
        _sendbuf: Option<&[u8]>,
        _recvbuf: &mut [u8],
        _recvcounts: &[usize],
        _displacements: &[usize],
        _element_size: usize,
    ) -> tensorsync::Result<()> {
        Err(TensorSyncError::transport("allgatherv unavailable"))
    }

    fn broadcast(
        &self,
        _entries: &[TensorEntry],
        _buffer: tensorsync::BroadcastBuffer<'_>,
        _count: usize,
        _dtype: DataType,
        _root: Rank,
    ) -> tensorsync::Result<()> {
        Err(TensorSyncError::transport("broadcast unavailable"))
    }

    fn abort(&self, _operation: &'static str) -> tensorsync::Result<()> {
        Ok(())
    }
}

#[test]
fn test_backend_failure_is_the_batch_status() {
    let state = RunState::new(0, 2, TensorSyncConfig::default()).unwrap();
    let m = OperationManager::new(state, Arc::new(BrokenBackend));
    let seen: Arc<Mutex<Vec<Status>>> = Arc::new(Mutex::new(Vec::new()));

    let mut entries: Vec<TensorEntry> = ["a", "b"]
        .iter()
        .map(|&n| {
            let seen = Arc::clone(&seen);
            entry_with_output(n, HostTensor::from_vec(vec![1.0f32]))
                .with_callback(move |s| seen.lock().unwrap().push(s.clone()))
        })
        .collect();
    let status = m.execute_operation(&mut entries, &Response::allreduce(vec![]));

    let err = status.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.to_string(), "allreduce failed at rank 1: connection reset");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|s| s.as_ref().unwrap_err() == &err));
}

#[test]
fn test_fusion_buffer_released_after_failure() {
    let state = RunState::new(0, 2, TensorSyncConfig::default()).unwrap();
    let m = OperationManager::new(Arc::clone(&state), Arc::new(BrokenBackend));
    for _ in 0..2 {
        let mut entries = vec![
            entry_with_output("a", HostTensor::from_vec(vec![1.0f32])),
            entry_with_output("b", HostTensor::from_vec(vec![2.0f32])),
        ];
        // A leaked buffer would surface as FusionBufferBusy on the second pass.
        let err = m
            .execute_operation(&mut entries, &Response::allreduce(vec![]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}

#[test]
fn test_rank_missing_output_releases_peers() {
    let outputs = run_collective(2, |m| {
        let rank = m.state().rank();
        let input = HostTensor::from_vec(vec![1.0f32 + rank as f32]);
        let mut round1 = if rank == 1 {
            vec![entry_without_output("g", input.clone())]
        } else {
            vec![entry_with_output("g", input.clone())]
        };
        let status1 = m.execute_operation(&mut round1, &Response::allreduce(vec!["g".into()]));

        let mut round2 = vec![entry_with_output("g", input)];
        m.execute_operation(&mut round2, &Response::allreduce(vec!["g".into()]))
            .unwrap();
        (status1, output_f32(&round2[0]))
    });

    let (status0, out0) = &outputs[0];
    assert!(matches!(
        status0,
        Err(TensorSyncError::CollectiveFailed {
            operation: "allreduce",
            rank: 1,
            ..
        })
    ));
    assert_eq!(out0, &vec![3.0]);

    let (status1, out1) = &outputs[1];
    assert_eq!(
        status1,
        &Err(TensorSyncError::MissingOutput { name: "g".into() })
    );
    assert_eq!(out1, &vec![3.0]);
}
