//! Command loop.
//!
//! Pulls raw poses from a [`PoseSource`], normalizes them and hands them to
//! the controller one at a time. A pose is fully settled before the next one
//! is read.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arm::ArmController;
use crate::bus::BusHandler;
use crate::error::ArmError;
use crate::normalize::normalize;

/// Where raw poses come from.
pub trait PoseSource {
    /// Next raw pose, or `None` at the end of input.
    fn next_pose(&mut self) -> Result<Option<Vec<f64>>, ArmError>;
}

impl PoseSource for VecDeque<Vec<f64>> {
    fn next_pose(&mut self) -> Result<Option<Vec<f64>>, ArmError> {
        Ok(self.pop_front())
    }
}

/// Reads poses as whitespace-separated radians.
///
/// A pose is `joint_count` consecutive values; line breaks don't matter.
pub struct PoseReader<R> {
    reader: R,
    joint_count: usize,
    pending: VecDeque<f64>,
    line: String,
    line_no: usize,
}

impl<R: BufRead> PoseReader<R> {
    pub fn new(reader: R, joint_count: usize) -> Self {
        Self {
            reader,
            joint_count,
            pending: VecDeque::new(),
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> PoseSource for PoseReader<R> {
    fn next_pose(&mut self) -> Result<Option<Vec<f64>>, ArmError> {
        while self.pending.len() < self.joint_count {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let got = self.pending.len();
                self.pending.clear();
                return Err(ArmError::input(format!(
                    "incomplete pose at end of input: {} of {} values",
                    got, self.joint_count
                )));
            }
            self.line_no += 1;

            for token in self.line.split_whitespace() {
                let value: f64 = token.parse().map_err(|_| {
                    ArmError::input(format!("line {}: {:?} is not a number", self.line_no, token))
                })?;
                self.pending.push_back(value);
            }
        }

        Ok(Some(self.pending.drain(..self.joint_count).collect()))
    }
}

/// Totals for one run of the command loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Poses dispatched and settled.
    pub poses: usize,
    /// Joint targets clamped into range.
    pub corrections: usize,
    /// Status passes spent waiting for the arm to settle.
    pub passes: u64,
}

/// Drive the arm through every pose of `source`.
///
/// `running` is checked before each pose; clearing it stops the loop after
/// the current move settles. Input errors and convergence timeouts end the
/// loop with the error.
pub fn run<B, S>(
    controller: &mut ArmController<B>,
    source: &mut S,
    running: &AtomicBool,
) -> Result<LoopSummary, ArmError>
where
    B: BusHandler,
    S: PoseSource + ?Sized,
{
    let mut summary = LoopSummary::default();

    while running.load(Ordering::SeqCst) {
        let Some(raw) = source.next_pose()? else {
            tracing::info!("End of input");
            return Ok(summary);
        };

        let normalized = normalize(controller.arm(), &raw)?;
        summary.corrections += normalized.corrections.len();

        let report = controller.move_to(&normalized.pose)?;
        summary.poses += 1;
        summary.passes += report.passes as u64;
        tracing::debug!(pose = summary.poses, passes = report.passes, "Pose reached");
    }

    tracing::info!("Stopped after {} poses", summary.poses);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;
    use std::io::Cursor;

    use super::*;
    use crate::bus::{CommFailure, SimulatedBus};
    use crate::config::{ArmConfig, ConvergencePolicy, DEFAULT_IDS};
    use crate::control_table::GOAL_POSITION;

    fn controller(bus: SimulatedBus) -> ArmController<SimulatedBus> {
        ArmController::new(bus, ArmConfig::default()).unwrap()
    }

    fn reader(text: &str, joints: usize) -> PoseReader<Cursor<Vec<u8>>> {
        PoseReader::new(Cursor::new(text.as_bytes().to_vec()), joints)
    }

    #[test]
    fn test_reader_spans_lines() {
        let mut poses = reader("0 0.1\n0.2\n\n  0.3 0.4 -0.5\n", 3);
        assert_eq!(poses.next_pose().unwrap(), Some(vec![0.0, 0.1, 0.2]));
        assert_eq!(poses.next_pose().unwrap(), Some(vec![0.3, 0.4, -0.5]));
        assert_eq!(poses.next_pose().unwrap(), None);
    }

    #[test]
    fn test_reader_several_poses_per_line() {
        let mut poses = reader("1 2 3 4", 2);
        assert_eq!(poses.next_pose().unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(poses.next_pose().unwrap(), Some(vec![3.0, 4.0]));
        assert_eq!(poses.next_pose().unwrap(), None);
    }

    #[test]
    fn test_reader_empty_input() {
        assert_eq!(reader("", 7).next_pose().unwrap(), None);
        assert_eq!(reader("\n  \n", 7).next_pose().unwrap(), None);
    }

    #[test]
    fn test_reader_rejects_partial_pose_and_garbage() {
        let mut poses = reader("0 0 0\n0 0\n", 3);
        assert!(poses.next_pose().unwrap().is_some());
        assert!(matches!(poses.next_pose(), Err(ArmError::Input(_))));
        assert_eq!(poses.next_pose().unwrap(), None);

        let mut poses = reader("0 0\n0 abc\n", 3);
        match poses.next_pose() {
            Err(ArmError::Input(msg)) => assert!(msg.contains("line 2"), "{msg}"),
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[test]
    fn test_run_dispatches_every_pose() {
        let mut ctrl = controller(SimulatedBus::new(DEFAULT_IDS, 0));
        ctrl.initialize().unwrap();
        let mut poses = reader("0 0 0 0 0 0 0\n0.1 0.2 0.3 0.4 0.5 0.6 0.7\n-3 0 0 0 0 0 0\n", 7);

        let summary = run(&mut ctrl, &mut poses, &AtomicBool::new(true)).unwrap();

        assert_eq!(summary.poses, 3);
        assert_eq!(summary.corrections, 1);
        assert!(summary.passes >= 3);
        assert_eq!(ctrl.bus().writes_to(GOAL_POSITION.address).len(), 3 * 7);
    }

    #[test]
    fn test_joint_failures_do_not_end_loop() {
        let mut bus = SimulatedBus::new(DEFAULT_IDS, 0);
        bus.inject_fault(3, GOAL_POSITION.address, CommFailure::RxTimeout.into());
        let mut ctrl = controller(bus);
        let mut poses: VecDeque<Vec<f64>> = VecDeque::from(vec![vec![0.0; 7], vec![0.5; 7]]);

        let summary = run(&mut ctrl, &mut poses, &AtomicBool::new(true)).unwrap();
        assert_eq!(summary.poses, 2);
        assert_eq!(ctrl.bus().writes_to(GOAL_POSITION.address).len(), 14);
    }

    #[test]
    fn test_timeout_ends_loop() {
        let mut bus = SimulatedBus::new(DEFAULT_IDS, 0);
        bus.set_stuck(2, true);
        let config = ArmConfig {
            convergence: ConvergencePolicy::default().max_passes(5),
            ..ArmConfig::default()
        };
        let mut ctrl = ArmController::new(bus, config).unwrap();
        let mut poses: VecDeque<Vec<f64>> = VecDeque::from(vec![vec![0.0; 7], vec![0.5; 7]]);

        let err = run(&mut ctrl, &mut poses, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, ArmError::ConvergenceTimeout { .. }));
        assert_eq!(ctrl.bus().writes_to(GOAL_POSITION.address).len(), 7);
        assert_eq!(poses.len(), 1);
    }

    #[test]
    fn test_input_error_ends_loop() {
        let mut ctrl = controller(SimulatedBus::new(DEFAULT_IDS, 0));
        let mut poses = reader("0 0 0 0 0 0 0\n0 0 nan? 0 0 0 0\n", 7);

        let err = run(&mut ctrl, &mut poses, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, ArmError::Input(_)));
        assert_eq!(ctrl.bus().writes_to(GOAL_POSITION.address).len(), 7);

        let mut poses: VecDeque<Vec<f64>> = VecDeque::from(vec![vec![0.0; 3]]);
        assert!(matches!(
            run(&mut ctrl, &mut poses, &AtomicBool::new(true)),
            Err(ArmError::PoseLength { expected: 7, got: 3 })
        ));
    }

    struct StopAfterFirst<'a> {
        running: &'a AtomicBool,
        served: usize,
    }

    impl PoseSource for StopAfterFirst<'_> {
        fn next_pose(&mut self) -> Result<Option<Vec<f64>>, ArmError> {
            self.served += 1;
            self.running.store(false, Ordering::SeqCst);
            Ok(Some(vec![PI / 4.0; 7]))
        }
    }

    #[test]
    fn test_cleared_flag_stops_between_poses() {
        let running = AtomicBool::new(true);
        let mut ctrl = controller(SimulatedBus::new(DEFAULT_IDS, 0));
        let mut source = StopAfterFirst {
            running: &running,
            served: 0,
        };

        let summary = run(&mut ctrl, &mut source, &running).unwrap();
        assert_eq!(summary.poses, 1);
        assert_eq!(source.served, 1);

        let summary = run(&mut ctrl, &mut source, &running).unwrap();
        assert_eq!(summary, LoopSummary::default());
        assert_eq!(source.served, 1);
    }
}
