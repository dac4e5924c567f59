// src/motion/trapq.rs - Trapezoidal velocity movement queue
//! Time-indexed queue of trapezoid segments.
//!
//! Moves are appended as accel/cruise/decel pieces sharing one direction
//! vector. Gaps between consecutive moves are filled with null moves so step
//! generation always sees a continuous timeline. Expired moves are retired
//! into a history list by [`TrajectoryQueue::finalize_moves`].

use std::collections::VecDeque;

use serde::Serialize;

/// Longest null move inserted in front of the very first move of a queue.
const MAX_NULL_MOVE: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord {
    pub const ORIGIN: Coord = Coord { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One constant-acceleration piece of a trapezoid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Move {
    pub print_time: f64,
    pub move_t: f64,
    pub start_v: f64,
    pub half_accel: f64,
    pub start_pos: Coord,
    pub axes_r: Coord,
}

impl Move {
    pub fn end_time(&self) -> f64 {
        self.print_time + self.move_t
    }

    pub fn get_distance(&self, move_time: f64) -> f64 {
        (self.start_v + self.half_accel * move_time) * move_time
    }

    pub fn get_coord(&self, move_time: f64) -> Coord {
        let move_dist = self.get_distance(move_time);
        Coord {
            x: self.start_pos.x + self.axes_r.x * move_dist,
            y: self.start_pos.y + self.axes_r.y * move_dist,
            z: self.start_pos.z + self.axes_r.z * move_dist,
        }
    }

    fn is_null(&self) -> bool {
        self.start_v == 0.0 && self.half_accel == 0.0
    }
}

/// A full trapezoid as handed to [`TrajectoryQueue::append`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapSegment {
    pub print_time: f64,
    pub accel_t: f64,
    pub cruise_t: f64,
    pub decel_t: f64,
    pub start_pos: Coord,
    pub axes_r: Coord,
    pub start_v: f64,
    pub cruise_v: f64,
    pub accel: f64,
}

/// Capabilities a trajectory queue must provide to the step generator and
/// to the synchronized-move engine.
pub trait TrajectoryQueue: Send {
    /// Append one trapezoid starting at `segment.print_time`.
    fn append(&mut self, segment: &TrapSegment);

    /// Retire every move that ends at or before `print_time`, then drop
    /// history entries that end at or before `clear_history_time`.
    fn finalize_moves(&mut self, print_time: f64, clear_history_time: f64);

    /// Record a position change at `print_time`.
    fn set_position(&mut self, print_time: f64, pos: Coord);

    /// Active moves overlapping the half-open window `(start_time, end_time]`.
    fn moves_between(&self, start_time: f64, end_time: f64) -> Vec<Move>;

    /// Number of moves that have not been finalized yet.
    fn pending_moves(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct TrapQ {
    moves: VecDeque<Move>,
    history: VecDeque<Move>,
}

impl TrapQ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn add_move(&mut self, m: Move) {
        if let Some(prev) = self.moves.back() {
            if prev.end_time() < m.print_time {
                let mut null_move = Move {
                    start_pos: m.start_pos,
                    ..Move::default()
                };
                if prev.print_time <= 0.0 && m.print_time > MAX_NULL_MOVE {
                    null_move.print_time = m.print_time - MAX_NULL_MOVE;
                } else {
                    null_move.print_time = prev.end_time();
                }
                null_move.move_t = m.print_time - null_move.print_time;
                self.moves.push_back(null_move);
            }
        }
        self.moves.push_back(m);
    }
}

impl TrajectoryQueue for TrapQ {
    fn append(&mut self, segment: &TrapSegment) {
        let mut cur_time = segment.print_time;
        let mut cur_pos = segment.start_pos;

        if segment.accel_t > 0.0 {
            let m = Move {
                print_time: cur_time,
                move_t: segment.accel_t,
                start_v: segment.start_v,
                half_accel: 0.5 * segment.accel,
                start_pos: cur_pos,
                axes_r: segment.axes_r,
            };
            self.add_move(m);
            cur_time += segment.accel_t;
            cur_pos = m.get_coord(segment.accel_t);
        }
        if segment.cruise_t > 0.0 {
            let m = Move {
                print_time: cur_time,
                move_t: segment.cruise_t,
                start_v: segment.cruise_v,
                half_accel: 0.0,
                start_pos: cur_pos,
                axes_r: segment.axes_r,
            };
            self.add_move(m);
            cur_time += segment.cruise_t;
            cur_pos = m.get_coord(segment.cruise_t);
        }
        if segment.decel_t > 0.0 {
            let m = Move {
                print_time: cur_time,
                move_t: segment.decel_t,
                start_v: segment.cruise_v,
                half_accel: -0.5 * segment.accel,
                start_pos: cur_pos,
                axes_r: segment.axes_r,
            };
            self.add_move(m);
        }
    }

    fn finalize_moves(&mut self, print_time: f64, clear_history_time: f64) {
        while let Some(m) = self.moves.front() {
            if m.end_time() > print_time {
                break;
            }
            if let Some(m) = self.moves.pop_front() {
                if !m.is_null() {
                    self.history.push_front(m);
                }
            }
        }
        while let Some(oldest) = self.history.back() {
            if oldest.end_time() > clear_history_time {
                break;
            }
            self.history.pop_back();
        }
    }

    fn set_position(&mut self, print_time: f64, pos: Coord) {
        self.finalize_moves(f64::INFINITY, 0.0);

        // Truncate any history that extends past the new position
        while let Some(m) = self.history.front_mut() {
            if m.print_time < print_time {
                if m.end_time() > print_time {
                    m.move_t = print_time - m.print_time;
                }
                break;
            }
            self.history.pop_front();
        }
        self.history.push_front(Move {
            print_time,
            start_pos: pos,
            ..Move::default()
        });
    }

    fn moves_between(&self, start_time: f64, end_time: f64) -> Vec<Move> {
        self.moves
            .iter()
            .filter(|m| m.end_time() > start_time && m.print_time < end_time)
            .copied()
            .collect()
    }

    fn pending_moves(&self) -> usize {
        self.moves.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(print_time: f64, accel_t: f64, cruise_t: f64, cruise_v: f64, accel: f64) -> TrapSegment {
        TrapSegment {
            print_time,
            accel_t,
            cruise_t,
            decel_t: accel_t,
            start_pos: Coord::ORIGIN,
            axes_r: Coord::new(1.0, 0.0, 0.0),
            start_v: 0.0,
            cruise_v,
            accel,
        }
    }

    #[test]
    fn test_append_splits_trapezoid() {
        let mut tq = TrapQ::new();
        tq.append(&segment(2.0, 1.0, 1.0, 5.0, 5.0));
        let moves = tq.moves_between(0.0, 10.0);
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].print_time, 2.0);
        assert_eq!(moves[1].print_time, 3.0);
        assert_eq!(moves[2].print_time, 4.0);
        // 2.5 accel + 5 cruise + 2.5 decel
        let last = moves[2];
        assert!((last.get_coord(last.move_t).x - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_trapezoid_adds_nothing() {
        let mut tq = TrapQ::new();
        tq.append(&segment(1.0, 0.0, 0.0, 0.0, 0.0));
        assert_eq!(tq.pending_moves(), 0);
    }

    #[test]
    fn test_gap_is_filled_with_null_move() {
        let mut tq = TrapQ::new();
        tq.append(&segment(0.5, 0.0, 1.0, 1.0, 0.0));
        tq.append(&segment(3.0, 0.0, 1.0, 1.0, 0.0));
        let moves = tq.moves_between(0.0, 10.0);
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[1].print_time, 1.5);
        assert_eq!(moves[1].move_t, 1.5);
        assert!(moves[1].is_null());
    }

    #[test]
    fn test_finalize_moves_to_history_and_clears() {
        let mut tq = TrapQ::new();
        tq.append(&segment(0.0, 1.0, 0.0, 1.0, 1.0));
        tq.finalize_moves(1.5, 0.0);
        assert_eq!(tq.pending_moves(), 1);
        assert_eq!(tq.history_len(), 1);
        tq.finalize_moves(100.0, 100.0);
        assert_eq!(tq.pending_moves(), 0);
        assert_eq!(tq.history_len(), 0);
    }

    #[test]
    fn test_set_position_truncates_history() {
        let mut tq = TrapQ::new();
        tq.append(&segment(0.0, 1.0, 2.0, 1.0, 1.0));
        tq.set_position(1.5, Coord::new(3.0, 0.0, 0.0));
        assert_eq!(tq.pending_moves(), 0);
        assert_eq!(tq.history_len(), 3);
    }
}
