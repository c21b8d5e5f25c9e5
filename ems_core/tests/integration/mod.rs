mod battery_sequencing;
mod config_loading;
mod cycle_phases;
mod task_selection;
mod write_shadow;
