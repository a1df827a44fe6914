//! Key inputs: single active-low buttons and a row/column key matrix.

use embedded_hal::digital::{InputPin, OutputPin};

use super::traits::KeySource;
use crate::keypad::Key;

/// One button on its own pin, pulled up and shorted to ground when pressed.
pub struct GpioKey<P> {
    pin: P,
    key: Key,
}

impl<P: InputPin> GpioKey<P> {
    pub fn new(pin: P, key: Key) -> Self {
        Self { pin, key }
    }
}

impl<P: InputPin> KeySource for GpioKey<P> {
    fn pressed(&mut self) -> Option<Key> {
        self.pin.is_low().unwrap_or(false).then_some(self.key)
    }
}

/// Matrix scanned by pulling one row low at a time and reading the pulled-up columns.
pub struct KeyMatrix<O, I, const R: usize, const C: usize> {
    rows: [O; R],
    cols: [I; C],
    keymap: [[Option<Key>; C]; R],
}

impl<O: OutputPin, I: InputPin, const R: usize, const C: usize> KeyMatrix<O, I, R, C> {
    /// Takes the pins and releases every row.
    pub fn new(mut rows: [O; R], cols: [I; C], keymap: [[Option<Key>; C]; R]) -> Self {
        for row in rows.iter_mut() {
            let _ = row.set_high();
        }
        Self { rows, cols, keymap }
    }
}

impl<O: OutputPin, I: InputPin, const R: usize, const C: usize> KeySource
    for KeyMatrix<O, I, R, C>
{
    /// The last key found in scan order wins when several are held.
    fn pressed(&mut self) -> Option<Key> {
        let mut found = None;
        for (row, keys) in self.rows.iter_mut().zip(self.keymap.iter()) {
            let _ = row.set_low();
            for (col, key) in self.cols.iter_mut().zip(keys.iter()) {
                if key.is_some() && col.is_low().unwrap_or(false) {
                    found = *key;
                }
            }
            let _ = row.set_high();
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::rc::Rc;

    /// Which row is driven low, and which (row, col) is shorted.
    #[derive(Default)]
    struct Board {
        driven: Cell<Option<usize>>,
        shorted: Cell<Option<(usize, usize)>>,
    }

    struct Row(usize, Rc<Board>);
    struct Col(usize, Rc<Board>);

    impl ErrorType for Row {
        type Error = Infallible;
    }

    impl OutputPin for Row {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.1.driven.set(Some(self.0));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            if self.1.driven.get() == Some(self.0) {
                self.1.driven.set(None);
            }
            Ok(())
        }
    }

    impl ErrorType for Col {
        type Error = Infallible;
    }

    impl InputPin for Col {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            self.is_low().map(|low| !low)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            let board = &self.1;
            Ok(matches!(
                (board.driven.get(), board.shorted.get()),
                (Some(row), Some((r, c))) if row == r && c == self.0
            ))
        }
    }

    fn matrix(board: &Rc<Board>) -> KeyMatrix<Row, Col, 2, 2> {
        KeyMatrix::new(
            [Row(0, board.clone()), Row(1, board.clone())],
            [Col(0, board.clone()), Col(1, board.clone())],
            [
                [Some(Key::Heat), Some(Key::HeatPlus)],
                [None, Some(Key::HeatMinus)],
            ],
        )
    }

    #[test]
    fn matrix_reports_held_key() {
        let board = Rc::new(Board::default());
        let mut keys = matrix(&board);
        assert_eq!(keys.pressed(), None);

        board.shorted.set(Some((1, 1)));
        assert_eq!(keys.pressed(), Some(Key::HeatMinus));
        board.shorted.set(Some((0, 1)));
        assert_eq!(keys.pressed(), Some(Key::HeatPlus));
        assert_eq!(board.driven.get(), None);
    }

    struct Level(bool);

    impl ErrorType for Level {
        type Error = Infallible;
    }

    impl InputPin for Level {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0)
        }
    }

    #[test]
    fn dedicated_key_takes_precedence() {
        let board = Rc::new(Board::default());
        board.shorted.set(Some((0, 0)));

        let mut keys = (GpioKey::new(Level(true), Key::Power), matrix(&board));
        assert_eq!(keys.pressed(), Some(Key::Heat));

        let mut keys = (GpioKey::new(Level(false), Key::Power), matrix(&board));
        assert_eq!(keys.pressed(), Some(Key::Power));
    }

    #[test]
    fn unmapped_position_is_ignored() {
        let board = Rc::new(Board::default());
        let mut keys = matrix(&board);
        board.shorted.set(Some((1, 0)));
        assert_eq!(keys.pressed(), None);
    }
}
