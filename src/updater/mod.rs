mod updater;

pub use updater::Updater;
