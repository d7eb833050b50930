use std::fmt::{self, Debug, Write};

/// Anything a node can hold.
///
/// `print` backs monitor output; `index` selects one element of a
/// vector-like value and is ignored by scalars.
pub trait Value: Clone + Debug + Send + Sync + 'static {
    fn print(&self, out: &mut dyn Write, _index: Option<usize>) -> fmt::Result {
        write!(out, "{:?}", self)
    }
}

impl Value for f64 {}
impl Value for i64 {}
impl Value for u32 {}
impl Value for usize {}
impl Value for bool {}

impl Value for String {
    fn print(&self, out: &mut dyn Write, _index: Option<usize>) -> fmt::Result {
        out.write_str(self)
    }
}

impl<T: Value> Value for Vec<T> {
    fn print(&self, out: &mut dyn Write, index: Option<usize>) -> fmt::Result {
        match index {
            Some(i) => self.get(i).ok_or(fmt::Error)?.print(out, None),
            None => {
                out.write_char('[')?;
                for (i, x) in self.iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    x.print(out, None)?;
                }
                out.write_char(']')
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn print_scalars_and_elements() {
        let mut s = String::new();
        2.5f64.print(&mut s, None).unwrap();
        assert_eq!(s, "2.5");

        let v = vec![1.0f64, 2.0, 3.5];
        let mut s = String::new();
        v.print(&mut s, None).unwrap();
        assert_eq!(s, "[1.0, 2.0, 3.5]");

        let mut s = String::new();
        v.print(&mut s, Some(2)).unwrap();
        assert_eq!(s, "3.5");

        let mut s = String::new();
        assert!(v.print(&mut s, Some(3)).is_err());
    }
}
