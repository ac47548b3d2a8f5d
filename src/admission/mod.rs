mod controller;

pub use controller::{
    Admission, AdmissionConfig, AdmissionController, AdmissionStats, Promotion, QueueStatus,
    QueueTicket,
};
