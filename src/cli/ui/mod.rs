mod device_view;
mod listen_view;
mod painter;
mod reading_view;
mod table;

pub(crate) use self::listen_view::{ListenReadyView, ListenSummaryView};
pub(crate) use self::painter::Painter;
pub(crate) use self::reading_view::{ReadingLineView, ReadingView, RejectedLineView};
