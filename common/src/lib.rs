pub mod telemtry;
